//! Package-scoped cache of GPU assets.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::path::{Path, PathBuf};

use glam::Vec3;

use super::loader::{self, LoadError, ModelSurfaceData, TextureData};
use super::{AssetCache, Handle};
use crate::renderer::backend::{
    CubeMapDesc, CubeMapFormat, CubeMapId, GeometryDesc, GpuBackend, TextureDesc, TextureFormat,
    TextureId,
};
use crate::renderer::error::RenderError;
use crate::renderer::geometry::Aabb;
use crate::renderer::material::{SurfaceFlags, SurfaceMaterial};
use crate::renderer::message::SurfaceDescriptor;
use crate::renderer::surface::{ModelSurface, StaticModel, Surface};

/// Names an asset inside a package.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AssetTag {
    pub package: String,
    pub asset: String,
}

impl AssetTag {
    pub fn new(package: impl Into<String>, asset: impl Into<String>) -> Self {
        Self {
            package: package.into(),
            asset: asset.into(),
        }
    }
}

impl fmt::Display for AssetTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.package, self.asset)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssetKind {
    Texture,
    CubeMap,
    StaticModel,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedAsset {
    pub path: PathBuf,
    pub kind: AssetKind,
}

/// Maps asset tags to files. Supplied by the host.
pub trait AssetResolver {
    fn resolve(&self, tag: &AssetTag) -> Option<ResolvedAsset>;

    /// Every asset name in a package, for eager loads.
    fn package_assets(&self, _package: &str) -> Vec<String> {
        Vec::new()
    }
}

impl<F> AssetResolver for F
where
    F: Fn(&AssetTag) -> Option<ResolvedAsset>,
{
    fn resolve(&self, tag: &AssetTag) -> Option<ResolvedAsset> {
        self(tag)
    }
}

/// Resolves `<root>/<package>/<asset>.<ext>`.
#[derive(Debug, Clone)]
pub struct DirectoryResolver {
    root: PathBuf,
}

const TEXTURE_EXTENSIONS: [&str; 5] = ["png", "jpg", "jpeg", "tga", "bmp"];
const MODEL_EXTENSIONS: [&str; 2] = ["gltf", "glb"];
const CUBE_MAP_SUFFIX: &str = ".cubemap.json";

impl DirectoryResolver {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn classify(path: &Path) -> Option<(String, AssetKind)> {
        let file_name = path.file_name()?.to_str()?;
        if let Some(stem) = file_name.strip_suffix(CUBE_MAP_SUFFIX) {
            return Some((stem.to_string(), AssetKind::CubeMap));
        }
        let extension = path.extension()?.to_str()?.to_ascii_lowercase();
        let stem = path.file_stem()?.to_str()?.to_string();
        if TEXTURE_EXTENSIONS.contains(&extension.as_str()) {
            Some((stem, AssetKind::Texture))
        } else if MODEL_EXTENSIONS.contains(&extension.as_str()) {
            Some((stem, AssetKind::StaticModel))
        } else {
            None
        }
    }
}

impl AssetResolver for DirectoryResolver {
    fn resolve(&self, tag: &AssetTag) -> Option<ResolvedAsset> {
        let dir = self.root.join(&tag.package);
        let cube_map = dir.join(format!("{}{}", tag.asset, CUBE_MAP_SUFFIX));
        if cube_map.is_file() {
            return Some(ResolvedAsset {
                path: cube_map,
                kind: AssetKind::CubeMap,
            });
        }
        let candidates = TEXTURE_EXTENSIONS
            .iter()
            .map(|ext| (ext, AssetKind::Texture))
            .chain(MODEL_EXTENSIONS.iter().map(|ext| (ext, AssetKind::StaticModel)));
        for (ext, kind) in candidates {
            let path = dir.join(format!("{}.{}", tag.asset, ext));
            if path.is_file() {
                return Some(ResolvedAsset { path, kind });
            }
        }
        None
    }

    fn package_assets(&self, package: &str) -> Vec<String> {
        let Ok(entries) = std::fs::read_dir(self.root.join(package)) else {
            return Vec::new();
        };
        let mut names: Vec<String> = entries
            .filter_map(Result::ok)
            .filter_map(|entry| Self::classify(&entry.path()).map(|(name, _)| name))
            .collect();
        names.sort();
        names.dedup();
        names
    }
}

/// Fallback textures used when a surface has no image of its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FallbackTextures {
    pub albedo: TextureId,
    pub normal: TextureId,
}

/// Image tags one user-defined surface takes from other packages.
#[derive(Debug, Clone, Default)]
struct BorrowedTextures {
    albedo: Option<AssetTag>,
    normal: Option<AssetTag>,
}

#[derive(Debug)]
enum RenderAsset {
    Texture(TextureId),
    CubeMap(CubeMapId),
    StaticModel {
        model: StaticModel,
        /// Textures embedded in the model file.
        owned_textures: Vec<TextureId>,
        /// One entry per surface for user-defined models, empty otherwise.
        borrowed: Vec<BorrowedTextures>,
        /// Cache generation the borrowed ids were resolved at.
        bound_generation: u64,
    },
}

impl RenderAsset {
    fn kind(&self) -> AssetKind {
        match self {
            RenderAsset::Texture(_) => AssetKind::Texture,
            RenderAsset::CubeMap(_) => AssetKind::CubeMap,
            RenderAsset::StaticModel { .. } => AssetKind::StaticModel,
        }
    }

    fn release(self, backend: &mut dyn GpuBackend) {
        match self {
            RenderAsset::Texture(id) => backend.destroy_texture(id),
            RenderAsset::CubeMap(id) => backend.destroy_cube_map(id),
            RenderAsset::StaticModel {
                model,
                owned_textures,
                ..
            } => {
                for geometry in model.geometries() {
                    backend.destroy_geometry(geometry);
                }
                for texture in owned_textures {
                    backend.destroy_texture(texture);
                }
            }
        }
    }
}

struct PackageEntry {
    handle: Handle<RenderAsset>,
    /// `None` for user-defined assets, which cannot be reloaded from disk.
    source: Option<ResolvedAsset>,
}

#[derive(Default)]
struct RenderPackage {
    entries: HashMap<String, PackageEntry>,
}

/// Memoized (package, asset) to GPU resource mapping.
///
/// Loads lazily on first reference. Unloading, reloading and destroying
/// user-defined models defer the GPU release to [`PackageCache::release_pending`]
/// so resources queued earlier in the frame stay live until submission.
pub struct PackageCache {
    resolver: Box<dyn AssetResolver>,
    fallback: FallbackTextures,
    assets: AssetCache<RenderAsset>,
    packages: HashMap<String, RenderPackage>,
    shortcut: Option<(AssetTag, Handle<RenderAsset>)>,
    failed: HashSet<AssetTag>,
    pending_release: Vec<RenderAsset>,
    generation: u64,
}

impl PackageCache {
    pub fn new(resolver: Box<dyn AssetResolver>, fallback: FallbackTextures) -> Self {
        Self {
            resolver,
            fallback,
            assets: AssetCache::new(),
            packages: HashMap::new(),
            shortcut: None,
            failed: HashSet::new(),
            pending_release: Vec::new(),
            generation: 0,
        }
    }

    pub fn fallback(&self) -> FallbackTextures {
        self.fallback
    }

    /// Bumped whenever previously returned ids may have been invalidated.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn is_loaded(&self, tag: &AssetTag) -> bool {
        self.find(tag).is_some()
    }

    pub fn loaded_count(&self) -> usize {
        self.assets.len()
    }

    pub fn texture(&mut self, backend: &mut dyn GpuBackend, tag: &AssetTag) -> Option<TextureId> {
        let handle = self.ensure(backend, tag, AssetKind::Texture)?;
        match self.assets.get(handle)? {
            RenderAsset::Texture(id) => Some(*id),
            _ => None,
        }
    }

    pub fn cube_map(&mut self, backend: &mut dyn GpuBackend, tag: &AssetTag) -> Option<CubeMapId> {
        let handle = self.ensure(backend, tag, AssetKind::CubeMap)?;
        match self.assets.get(handle)? {
            RenderAsset::CubeMap(id) => Some(*id),
            _ => None,
        }
    }

    pub fn static_model(&mut self, backend: &mut dyn GpuBackend, tag: &AssetTag) -> Option<&StaticModel> {
        let handle = self.ensure(backend, tag, AssetKind::StaticModel)?;
        self.rebind_borrowed(backend, handle);
        match self.assets.get(handle)? {
            RenderAsset::StaticModel { model, .. } => Some(model),
            _ => None,
        }
    }

    /// Re-resolves the textures a user-defined model names from other
    /// packages after an unload or reload may have released them.
    fn rebind_borrowed(&mut self, backend: &mut dyn GpuBackend, handle: Handle<RenderAsset>) {
        let generation = self.generation;
        let borrowed = match self.assets.get(handle) {
            Some(RenderAsset::StaticModel {
                borrowed,
                bound_generation,
                ..
            }) if *bound_generation != generation && !borrowed.is_empty() => borrowed.clone(),
            _ => return,
        };

        let mut resolved = Vec::with_capacity(borrowed.len());
        for textures in &borrowed {
            let albedo = textures
                .albedo
                .as_ref()
                .and_then(|image| self.texture(backend, image));
            let normal = textures
                .normal
                .as_ref()
                .and_then(|image| self.texture(backend, image));
            resolved.push((albedo, normal));
        }

        let fallback = self.fallback;
        if let Some(RenderAsset::StaticModel {
            model,
            bound_generation,
            ..
        }) = self.assets.get_mut(handle)
        {
            for (surface, (albedo, normal)) in model.surfaces.iter_mut().zip(resolved) {
                let material = &mut surface.surface.material;
                material.albedo_texture = albedo.unwrap_or(fallback.albedo);
                material.normal_texture = normal.unwrap_or(fallback.normal);
                material.flags.set(SurfaceFlags::NORMAL_MAP, normal.is_some());
            }
            *bound_generation = generation;
        }
    }

    fn find(&self, tag: &AssetTag) -> Option<Handle<RenderAsset>> {
        if let Some((cached, handle)) = &self.shortcut {
            if cached == tag {
                return Some(*handle);
            }
        }
        self.packages
            .get(&tag.package)
            .and_then(|package| package.entries.get(&tag.asset))
            .map(|entry| entry.handle)
    }

    fn ensure(
        &mut self,
        backend: &mut dyn GpuBackend,
        tag: &AssetTag,
        expected: AssetKind,
    ) -> Option<Handle<RenderAsset>> {
        let handle = match self.find(tag) {
            Some(handle) => handle,
            None => self.load(backend, tag)?,
        };
        self.shortcut = Some((tag.clone(), handle));

        let asset = self.assets.get(handle)?;
        if asset.kind() != expected {
            if self.failed.insert(tag.clone()) {
                log::warn!("Asset {} is a {:?}, not a {:?}", tag, asset.kind(), expected);
            }
            return None;
        }
        Some(handle)
    }

    fn load(&mut self, backend: &mut dyn GpuBackend, tag: &AssetTag) -> Option<Handle<RenderAsset>> {
        if self.failed.contains(tag) {
            return None;
        }
        let Some(resolved) = self.resolver.resolve(tag) else {
            log::warn!("Asset {} could not be resolved", tag);
            self.failed.insert(tag.clone());
            return None;
        };

        match self.load_resolved(backend, tag, &resolved) {
            Ok(asset) => {
                let handle = self.assets.insert(asset);
                self.packages
                    .entry(tag.package.clone())
                    .or_default()
                    .entries
                    .insert(
                        tag.asset.clone(),
                        PackageEntry {
                            handle,
                            source: Some(resolved),
                        },
                    );
                Some(handle)
            }
            Err(err) => {
                log::error!("{}", err);
                self.failed.insert(tag.clone());
                None
            }
        }
    }

    fn load_resolved(
        &self,
        backend: &mut dyn GpuBackend,
        tag: &AssetTag,
        resolved: &ResolvedAsset,
    ) -> Result<RenderAsset, RenderError> {
        let label = tag.to_string();
        let load_error = |source: LoadError| RenderError::AssetLoad {
            tag: tag.clone(),
            source,
        };
        match resolved.kind {
            AssetKind::Texture => {
                let data = loader::load_texture(&resolved.path).map_err(load_error)?;
                create_texture(backend, &label, &data, TextureFormat::Rgba8Srgb).map(RenderAsset::Texture)
            }
            AssetKind::CubeMap => {
                let data = loader::load_cube_map(&resolved.path).map_err(load_error)?;
                let faces = [
                    data.faces[0].pixels.as_slice(),
                    data.faces[1].pixels.as_slice(),
                    data.faces[2].pixels.as_slice(),
                    data.faces[3].pixels.as_slice(),
                    data.faces[4].pixels.as_slice(),
                    data.faces[5].pixels.as_slice(),
                ];
                backend
                    .create_cube_map(&CubeMapDesc {
                        label: &label,
                        resolution: data.resolution,
                        mip_levels: 1,
                        format: CubeMapFormat::Rgba8Srgb,
                        faces: Some(faces),
                    })
                    .map(RenderAsset::CubeMap)
            }
            AssetKind::StaticModel => {
                let surfaces = loader::load_static_model(&resolved.path).map_err(load_error)?;
                self.create_loaded_model(backend, &label, &surfaces)
            }
        }
    }

    fn create_loaded_model(
        &self,
        backend: &mut dyn GpuBackend,
        label: &str,
        surfaces: &[ModelSurfaceData],
    ) -> Result<RenderAsset, RenderError> {
        let mut built = BuiltModel::default();
        for data in surfaces {
            if let Err(err) = self.build_loaded_surface(backend, &mut built, label, data) {
                built.into_asset().release(backend);
                return Err(err);
            }
        }
        Ok(built.into_asset())
    }

    fn build_loaded_surface(
        &self,
        backend: &mut dyn GpuBackend,
        built: &mut BuiltModel,
        label: &str,
        data: &ModelSurfaceData,
    ) -> Result<(), RenderError> {
        let albedo = match &data.albedo_image {
            Some(image) => built.own(create_texture(backend, &data.name, image, TextureFormat::Rgba8Srgb)?),
            None => self.fallback.albedo,
        };
        let normal = match &data.normal_image {
            Some(image) => built.own(create_texture(backend, &data.name, image, TextureFormat::Rgba8Linear)?),
            None => self.fallback.normal,
        };
        let mut material = SurfaceMaterial::new(albedo, normal)
            .with_albedo(data.albedo)
            .with_metallic(data.metallic)
            .with_roughness(data.roughness)
            .with_ambient_occlusion(data.ambient_occlusion)
            .with_emission(data.emission);
        if data.normal_image.is_some() {
            material = material.with_flags(SurfaceFlags::NORMAL_MAP);
        }
        built.push_surface(backend, label, &data.vertices, &data.indices, data.transform, material)
    }

    /// Registers a model built from caller-supplied geometry.
    pub fn create_user_defined_static_model(
        &mut self,
        backend: &mut dyn GpuBackend,
        tag: &AssetTag,
        surfaces: &[SurfaceDescriptor],
    ) -> Result<(), RenderError> {
        let label = tag.to_string();
        let mut built = BuiltModel::default();
        for descriptor in surfaces {
            let material_desc = &descriptor.material;
            let albedo = material_desc
                .albedo_image
                .as_ref()
                .and_then(|image| self.texture(backend, image))
                .unwrap_or(self.fallback.albedo);
            let normal = material_desc
                .normal_image
                .as_ref()
                .and_then(|image| self.texture(backend, image));
            built.borrow(BorrowedTextures {
                albedo: material_desc.albedo_image.clone(),
                normal: material_desc.normal_image.clone(),
            });
            let mut flags = SurfaceFlags::empty();
            flags.set(SurfaceFlags::NORMAL_MAP, normal.is_some());
            flags.set(SurfaceFlags::INVERT_ROUGHNESS, material_desc.invert_roughness);
            let material = SurfaceMaterial::new(albedo, normal.unwrap_or(self.fallback.normal))
                .with_albedo(material_desc.albedo)
                .with_metallic(material_desc.metallic)
                .with_roughness(material_desc.roughness)
                .with_ambient_occlusion(material_desc.ambient_occlusion)
                .with_emission(material_desc.emission)
                .with_height(material_desc.height)
                .with_flags(flags);
            if let Err(err) = built.push_surface(
                backend,
                &label,
                &descriptor.vertices,
                &descriptor.indices,
                descriptor.transform,
                material,
            ) {
                built.into_asset().release(backend);
                return Err(err);
            }
        }

        let mut asset = built.into_asset();
        if let RenderAsset::StaticModel {
            bound_generation, ..
        } = &mut asset
        {
            *bound_generation = self.generation;
        }
        let handle = self.assets.insert(asset);
        let previous = self
            .packages
            .entry(tag.package.clone())
            .or_default()
            .entries
            .insert(tag.asset.clone(), PackageEntry { handle, source: None });
        if let Some(previous) = previous {
            log::warn!("User-defined model {} replaced an existing asset", tag);
            if let Some(asset) = self.assets.remove(previous.handle) {
                self.pending_release.push(asset);
            }
        }
        self.failed.remove(tag);
        self.shortcut = None;
        Ok(())
    }

    pub fn destroy_user_defined_static_model(&mut self, tag: &AssetTag) {
        let Some(package) = self.packages.get_mut(&tag.package) else {
            return;
        };
        let user_defined = package
            .entries
            .get(&tag.asset)
            .is_some_and(|entry| entry.source.is_none());
        if !user_defined {
            log::warn!("{} is not a user-defined model; not destroyed", tag);
            return;
        }
        if let Some(entry) = package.entries.remove(&tag.asset) {
            if let Some(asset) = self.assets.remove(entry.handle) {
                self.pending_release.push(asset);
            }
        }
        self.shortcut = None;
        self.generation += 1;
    }

    /// Eagerly loads every asset the resolver lists for `package`.
    pub fn load_package(&mut self, backend: &mut dyn GpuBackend, package: &str) {
        let names = self.resolver.package_assets(package);
        if names.is_empty() {
            log::warn!("Package {} lists no assets", package);
        }
        for name in names {
            let tag = AssetTag::new(package, name);
            if self.find(&tag).is_none() {
                self.load(backend, &tag);
            }
        }
        log::info!("Loaded render package {}", package);
    }

    pub fn unload_package(&mut self, package: &str) {
        let Some(removed) = self.packages.remove(package) else {
            return;
        };
        for entry in removed.entries.into_values() {
            if let Some(asset) = self.assets.remove(entry.handle) {
                self.pending_release.push(asset);
            }
        }
        self.failed.retain(|tag| tag.package != package);
        self.shortcut = None;
        self.generation += 1;
        log::info!("Unloaded render package {}", package);
    }

    /// Reloads every file-backed asset in place. Assets that fail to reload
    /// keep their previous contents.
    pub fn reload(&mut self, backend: &mut dyn GpuBackend) {
        let mut reloads = Vec::new();
        for (package_name, package) in &self.packages {
            for (asset_name, entry) in &package.entries {
                if let Some(source) = &entry.source {
                    reloads.push((
                        AssetTag::new(package_name.clone(), asset_name.clone()),
                        entry.handle,
                        source.clone(),
                    ));
                }
            }
        }

        for (tag, handle, source) in reloads {
            match self.load_resolved(backend, &tag, &source) {
                Ok(asset) => {
                    if let Some(previous) = self.assets.replace(handle, asset) {
                        self.pending_release.push(previous);
                    }
                }
                Err(err) => log::error!("Reload kept previous contents: {}", err),
            }
        }

        self.failed.clear();
        self.shortcut = None;
        self.generation += 1;
        log::info!("Reloaded render assets");
    }

    /// Frees resources released during the frame. Call after submission.
    pub fn release_pending(&mut self, backend: &mut dyn GpuBackend) {
        for asset in self.pending_release.drain(..) {
            asset.release(backend);
        }
    }

    pub fn clean_up(&mut self, backend: &mut dyn GpuBackend) {
        self.release_pending(backend);
        for asset in self.assets.drain() {
            asset.release(backend);
        }
        self.packages.clear();
        self.failed.clear();
        self.shortcut = None;
        self.generation += 1;
    }
}

fn create_texture(
    backend: &mut dyn GpuBackend,
    label: &str,
    data: &TextureData,
    format: TextureFormat,
) -> Result<TextureId, RenderError> {
    backend.create_texture(&TextureDesc {
        label,
        width: data.width,
        height: data.height,
        format,
        pixels: &data.pixels,
    })
}

#[derive(Default)]
struct BuiltModel {
    surfaces: Vec<ModelSurface>,
    owned_textures: Vec<TextureId>,
    borrowed: Vec<BorrowedTextures>,
}

impl BuiltModel {
    fn borrow(&mut self, textures: BorrowedTextures) {
        self.borrowed.push(textures);
    }

    fn own(&mut self, texture: TextureId) -> TextureId {
        self.owned_textures.push(texture);
        texture
    }

    fn push_surface(
        &mut self,
        backend: &mut dyn GpuBackend,
        label: &str,
        vertices: &[crate::renderer::geometry::Vertex],
        indices: &[u32],
        transform: glam::Mat4,
        material: SurfaceMaterial,
    ) -> Result<(), RenderError> {
        let geometry = backend.create_geometry(&GeometryDesc {
            label,
            vertices,
            indices,
        })?;
        let bounds = Aabb::from_points(vertices.iter().map(|v| Vec3::from(v.position)))
            .unwrap_or(Aabb::UNIT)
            .transformed(transform);
        self.surfaces.push(ModelSurface {
            surface: Surface { geometry, material },
            bounds,
            transform,
        });
        Ok(())
    }

    fn into_asset(self) -> RenderAsset {
        RenderAsset::StaticModel {
            model: StaticModel::new(self.surfaces),
            owned_textures: self.owned_textures,
            borrowed: self.borrowed,
            bound_generation: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tags_display_as_package_slash_asset() {
        assert_eq!(AssetTag::new("Default", "Box").to_string(), "Default/Box");
    }

    #[test]
    fn classify_recognises_cube_map_manifests() {
        assert_eq!(
            DirectoryResolver::classify(Path::new("sky/Day.cubemap.json")),
            Some(("Day".to_string(), AssetKind::CubeMap))
        );
        assert_eq!(
            DirectoryResolver::classify(Path::new("a/Crate.PNG")),
            Some(("Crate".to_string(), AssetKind::Texture))
        );
        assert_eq!(
            DirectoryResolver::classify(Path::new("a/Ship.glb")),
            Some(("Ship".to_string(), AssetKind::StaticModel))
        );
        assert_eq!(DirectoryResolver::classify(Path::new("a/readme.txt")), None);
    }
}
