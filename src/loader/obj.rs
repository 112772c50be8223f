//! Wavefront OBJ import through `tobj`.

use std::path::Path;

use crate::render::RenderOptions;
use crate::scene::{Material, Mesh, MeshInstance, Scene};
use crate::util::{Error, Mat4, Result, Vec2, Vec3};

/// Fallback diffuse color when the OBJ has no usable material.
const DEFAULT_DIFFUSE: [f32; 3] = [0.8, 0.8, 0.8];

fn read_models(path: &Path) -> Result<(Vec<tobj::Model>, Vec<tobj::Material>)> {
    let (models, materials) = tobj::load_obj(path, &tobj::GPU_LOAD_OPTIONS)?;
    let materials = materials.unwrap_or_else(|e| {
        tracing::warn!(path = %path.display(), error = %e, "OBJ materials not loaded");
        Vec::new()
    });
    Ok((models, materials))
}

fn model_to_mesh(name: String, mesh: &tobj::Mesh) -> Result<Mesh> {
    let positions: Vec<Vec3> = mesh
        .positions
        .chunks_exact(3)
        .map(|p| Vec3::new(p[0], p[1], p[2]))
        .collect();
    let normals: Vec<Vec3> = mesh
        .normals
        .chunks_exact(3)
        .map(|n| Vec3::new(n[0], n[1], n[2]))
        .collect();
    let uvs: Vec<Vec2> = mesh
        .texcoords
        .chunks_exact(2)
        .map(|t| Vec2::new(t[0], t[1]))
        .collect();

    Mesh::from_indexed(
        name,
        &positions,
        (normals.len() == positions.len()).then_some(normals.as_slice()),
        (uvs.len() == positions.len()).then_some(uvs.as_slice()),
        &mesh.indices,
    )
}

/// Load every object of an OBJ file merged into one mesh.
pub fn load_obj_mesh(path: &Path, name: impl Into<String>) -> Result<Mesh> {
    let (models, _) = read_models(path)?;
    let mut merged = tobj::Mesh::default();
    for model in &models {
        let base = (merged.positions.len() / 3) as u32;
        let m = &model.mesh;
        merged.positions.extend_from_slice(&m.positions);
        merged.normals.extend_from_slice(&m.normals);
        merged.texcoords.extend_from_slice(&m.texcoords);
        merged.indices.extend(m.indices.iter().map(|i| i + base));
    }
    // Partial attribute coverage cannot be merged; drop and recompute
    let verts = merged.positions.len() / 3;
    if merged.normals.len() != verts * 3 {
        merged.normals.clear();
    }
    if merged.texcoords.len() != verts * 2 {
        merged.texcoords.clear();
    }
    if merged.indices.is_empty() {
        return Err(Error::config(format!("'{}' contains no triangles", path.display())));
    }
    model_to_mesh(name.into(), &merged)
}

/// Load an OBJ as a scene: one mesh and one identity instance per object,
/// materials from the MTL file when present.
pub fn load_obj_scene(path: &Path, options: RenderOptions) -> Result<Scene> {
    let (models, obj_materials) = read_models(path)?;
    let mut scene = Scene::with_options(options);

    let material_ids: Vec<usize> = obj_materials
        .iter()
        .map(|m| {
            scene.add_material(Material {
                base_color: m.diffuse.unwrap_or(DEFAULT_DIFFUSE),
                opacity: m.dissolve.unwrap_or(1.0),
                ior: m.optical_density.unwrap_or(1.45),
                ..Default::default()
            })
        })
        .collect();
    let mut fallback = None;

    for (i, model) in models.iter().enumerate() {
        if model.mesh.indices.is_empty() {
            continue;
        }
        let name = if model.name.is_empty() {
            format!("object{i}")
        } else {
            model.name.clone()
        };
        // tobj splits an object per `usemtl`, repeating its name; meshes are
        // deduplicated by name, so later groups need their own
        let mesh_name = if scene.meshes().iter().any(|m| m.name == name) {
            format!("{name}#{i}")
        } else {
            name.clone()
        };
        let mesh_id = scene.add_mesh(model_to_mesh(mesh_name, &model.mesh)?);
        let material_id = match model.mesh.material_id.and_then(|id| material_ids.get(id)) {
            Some(&id) => id,
            None => *fallback.get_or_insert_with(|| scene.add_material(Material::diffuse(DEFAULT_DIFFUSE))),
        };
        scene.add_instance(MeshInstance::new(name, mesh_id, material_id, Mat4::IDENTITY));
    }

    if scene.instances().is_empty() {
        return Err(Error::config(format!("'{}' contains no triangles", path.display())));
    }
    Ok(scene)
}
