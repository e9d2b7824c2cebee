//! Decoding of on-disk assets into CPU-side data.

use std::fs;
use std::path::{Path, PathBuf};

use glam::{Mat4, Vec4};
use serde::Deserialize;
use thiserror::Error;

use crate::renderer::geometry::Vertex;

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to read {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("image error: {0}")]
    Image(#[from] image::ImageError),
    #[error("glTF error: {0}")]
    Gltf(#[from] gltf::Error),
    #[error("cube map manifest error: {0}")]
    Manifest(#[from] serde_json::Error),
    #[error("invalid asset: {0}")]
    Invalid(String),
}

/// Tightly packed RGBA8 pixels.
#[derive(Debug, Clone, PartialEq)]
pub struct TextureData {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CubeMapData {
    pub resolution: u32,
    /// +X, -X, +Y, -Y, +Z, -Z
    pub faces: [TextureData; 6],
}

#[derive(Debug, Clone, PartialEq)]
pub struct ModelSurfaceData {
    pub name: String,
    pub vertices: Vec<Vertex>,
    pub indices: Vec<u32>,
    pub transform: Mat4,
    pub albedo: Vec4,
    pub metallic: f32,
    pub roughness: f32,
    pub ambient_occlusion: f32,
    pub emission: f32,
    pub albedo_image: Option<TextureData>,
    pub normal_image: Option<TextureData>,
}

/// `<name>.cubemap.json`: six face images relative to the manifest.
#[derive(Debug, Deserialize)]
struct CubeMapManifest {
    faces: [String; 6],
}

pub fn load_texture(path: &Path) -> Result<TextureData, LoadError> {
    let image = image::open(path)?.to_rgba8();
    let (width, height) = image.dimensions();
    Ok(TextureData {
        width,
        height,
        pixels: image.into_raw(),
    })
}

pub fn load_cube_map(path: &Path) -> Result<CubeMapData, LoadError> {
    let contents = fs::read_to_string(path).map_err(|source| LoadError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let manifest: CubeMapManifest = serde_json::from_str(&contents)?;
    let base_dir = path.parent().unwrap_or_else(|| Path::new("."));

    let mut faces = Vec::with_capacity(6);
    for face in &manifest.faces {
        faces.push(load_texture(&base_dir.join(face))?);
    }
    let resolution = faces[0].width;
    if faces
        .iter()
        .any(|f| f.width != resolution || f.height != resolution)
    {
        return Err(LoadError::Invalid(format!(
            "cube map faces in {:?} must be square and equally sized",
            path
        )));
    }
    let faces: [TextureData; 6] = faces
        .try_into()
        .map_err(|_| LoadError::Invalid("cube map needs six faces".into()))?;
    Ok(CubeMapData { resolution, faces })
}

pub fn load_static_model(path: &Path) -> Result<Vec<ModelSurfaceData>, LoadError> {
    let (document, buffers, images) = gltf::import(path)?;
    let scene = document
        .default_scene()
        .or_else(|| document.scenes().next())
        .ok_or_else(|| LoadError::Invalid(format!("{:?} has no scene", path)))?;

    let mut surfaces = Vec::new();
    for node in scene.nodes() {
        load_node(&node, Mat4::IDENTITY, &buffers, &images, &mut surfaces)?;
    }
    if surfaces.is_empty() {
        return Err(LoadError::Invalid(format!("{:?} has no meshes", path)));
    }
    log::debug!("Loaded {} surfaces from {:?}", surfaces.len(), path);
    Ok(surfaces)
}

fn load_node(
    node: &gltf::Node,
    parent: Mat4,
    buffers: &[gltf::buffer::Data],
    images: &[gltf::image::Data],
    surfaces: &mut Vec<ModelSurfaceData>,
) -> Result<(), LoadError> {
    let transform = parent * Mat4::from_cols_array_2d(&node.transform().matrix());
    let node_name = node.name().unwrap_or("Unnamed");

    if let Some(mesh) = node.mesh() {
        for (index, primitive) in mesh.primitives().enumerate() {
            let name = format!("{}_Primitive_{}", node_name, index + 1);
            surfaces.push(load_primitive(&primitive, name, transform, buffers, images)?);
        }
    }
    for child in node.children() {
        load_node(&child, transform, buffers, images, surfaces)?;
    }
    Ok(())
}

fn load_primitive(
    primitive: &gltf::Primitive,
    name: String,
    transform: Mat4,
    buffers: &[gltf::buffer::Data],
    images: &[gltf::image::Data],
) -> Result<ModelSurfaceData, LoadError> {
    let reader = primitive.reader(|buffer| Some(&buffers[buffer.index()]));

    let positions = reader
        .read_positions()
        .ok_or_else(|| LoadError::Invalid(format!("{} is missing positions", name)))?
        .collect::<Vec<_>>();

    let normals = reader
        .read_normals()
        .map(|n| n.collect::<Vec<_>>())
        .unwrap_or_else(|| vec![[0.0, 1.0, 0.0]; positions.len()]);

    let uvs = reader
        .read_tex_coords(0)
        .map(|uv| uv.into_f32().collect::<Vec<_>>())
        .unwrap_or_else(|| vec![[0.0, 0.0]; positions.len()]);

    let indices = reader
        .read_indices()
        .map(|i| i.into_u32().collect::<Vec<_>>())
        .unwrap_or_else(|| (0..positions.len() as u32).collect());

    let vertices = positions
        .iter()
        .zip(normals.iter())
        .zip(uvs.iter())
        .map(|((position, normal), tex_coords)| Vertex {
            position: *position,
            normal: *normal,
            tex_coords: *tex_coords,
        })
        .collect::<Vec<_>>();

    let material = primitive.material();
    let pbr = material.pbr_metallic_roughness();
    let emissive = material.emissive_factor();

    let albedo_image = pbr
        .base_color_texture()
        .and_then(|info| image_to_rgba8(&images[info.texture().source().index()]));
    let normal_image = material
        .normal_texture()
        .and_then(|info| image_to_rgba8(&images[info.texture().source().index()]));

    Ok(ModelSurfaceData {
        name,
        vertices,
        indices,
        transform,
        albedo: Vec4::from_array(pbr.base_color_factor()),
        metallic: pbr.metallic_factor(),
        roughness: pbr.roughness_factor(),
        ambient_occlusion: 1.0,
        emission: emissive[0].max(emissive[1]).max(emissive[2]),
        albedo_image,
        normal_image,
    })
}

fn image_to_rgba8(data: &gltf::image::Data) -> Option<TextureData> {
    let pixels = match data.format {
        gltf::image::Format::R8G8B8A8 => data.pixels.clone(),
        gltf::image::Format::R8G8B8 => data
            .pixels
            .chunks_exact(3)
            .flat_map(|rgb| [rgb[0], rgb[1], rgb[2], 255])
            .collect(),
        gltf::image::Format::R8 => data.pixels.iter().flat_map(|r| [*r, *r, *r, 255]).collect(),
        other => {
            log::warn!("Unsupported embedded image format {:?}; using fallback", other);
            return None;
        }
    };
    Some(TextureData {
        width: data.width,
        height: data.height,
        pixels,
    })
}
