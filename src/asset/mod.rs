pub mod cache;
pub mod handle;
pub mod loader;
pub mod package;

pub use cache::AssetCache;
pub use handle::Handle;
pub use loader::LoadError;
pub use package::{
    AssetKind, AssetResolver, AssetTag, DirectoryResolver, FallbackTextures, PackageCache,
    ResolvedAsset,
};
