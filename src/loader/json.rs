//! JSON scene descriptions.
//!
//! Objects reference each other by name; paths are relative to the scene file.
//!
//! ```json
//! {
//!   "options": { "max_spp": 256 },
//!   "camera": { "position": [0, 1, 5], "look_at": [0, 1, 0], "fov": 45 },
//!   "materials": [{ "name": "red", "base_color": [0.8, 0.1, 0.1] }],
//!   "meshes": [{ "name": "bunny", "path": "bunny.obj" }],
//!   "instances": [{ "mesh": "bunny", "material": "red", "translate": [1, 0, 0] }]
//! }
//! ```

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use super::obj::load_obj_mesh;
use crate::render::RenderOptions;
use crate::scene::{Camera, CameraDesc, Light, Material, Mesh, MeshInstance, Scene, NO_TEXTURE};
use crate::util::{Error, Mat4, Quat, Result, Vec2, Vec3};

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SceneDesc {
    /// Overrides on top of the caller's options (as raw JSON so that only
    /// present keys apply).
    pub options: Option<serde_json::Value>,
    pub camera: Option<CameraDesc>,
    pub environment: Option<PathBuf>,
    pub textures: Vec<TextureDesc>,
    pub materials: Vec<MaterialDesc>,
    pub meshes: Vec<MeshDesc>,
    pub lights: Vec<LightDesc>,
    pub instances: Vec<InstanceDesc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TextureDesc {
    pub name: String,
    pub path: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MaterialDesc {
    pub name: String,
    #[serde(flatten)]
    pub params: Material,
    pub base_color_texture: Option<String>,
    pub metallic_roughness_texture: Option<String>,
    pub normal_texture: Option<String>,
    pub emission_texture: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MeshDesc {
    pub name: String,
    #[serde(flatten)]
    pub source: MeshSource,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum MeshSource {
    File {
        path: PathBuf,
    },
    Inline {
        positions: Vec<[f32; 3]>,
        indices: Vec<u32>,
        #[serde(default)]
        normals: Option<Vec<[f32; 3]>>,
        #[serde(default)]
        uvs: Option<Vec<[f32; 2]>>,
    },
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum LightDesc {
    Rect {
        position: [f32; 3],
        u: [f32; 3],
        v: [f32; 3],
        emission: [f32; 3],
    },
    Sphere {
        position: [f32; 3],
        radius: f32,
        emission: [f32; 3],
    },
    Distant {
        direction: [f32; 3],
        emission: [f32; 3],
    },
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InstanceDesc {
    #[serde(default)]
    pub name: Option<String>,
    pub mesh: String,
    pub material: String,
    /// Column-major 4x4 matrix; wins over translate/rotate/scale.
    #[serde(default)]
    pub matrix: Option<[f32; 16]>,
    #[serde(default)]
    pub translate: Option<[f32; 3]>,
    /// Euler angles in degrees, applied X then Y then Z.
    #[serde(default)]
    pub rotate: Option<[f32; 3]>,
    #[serde(default)]
    pub scale: Option<[f32; 3]>,
}

impl InstanceDesc {
    pub fn transform(&self) -> Mat4 {
        if let Some(m) = self.matrix {
            return Mat4::from_cols_array(&m);
        }
        let t = self.translate.map(Vec3::from).unwrap_or(Vec3::ZERO);
        let s = self.scale.map(Vec3::from).unwrap_or(Vec3::ONE);
        let r = self
            .rotate
            .map(|[x, y, z]| {
                Quat::from_euler(glam::EulerRot::ZYX, z.to_radians(), y.to_radians(), x.to_radians())
            })
            .unwrap_or(Quat::IDENTITY);
        Mat4::from_scale_rotation_translation(s, r, t)
    }
}

impl LightDesc {
    fn to_light(&self) -> Light {
        match *self {
            LightDesc::Rect {
                position,
                u,
                v,
                emission,
            } => Light::rect(position.into(), u.into(), v.into(), emission.into()),
            LightDesc::Sphere {
                position,
                radius,
                emission,
            } => Light::sphere(position.into(), radius, emission.into()),
            LightDesc::Distant { direction, emission } => Light::distant(direction.into(), emission.into()),
        }
    }
}

/// Parse a scene description from a JSON string.
pub fn parse_scene_desc(json: &str) -> Result<SceneDesc> {
    Ok(serde_json::from_str(json)?)
}

/// Load a JSON scene file.
pub fn load_json_scene(path: &Path, options: RenderOptions) -> Result<Scene> {
    let json = std::fs::read_to_string(path)?;
    let desc = parse_scene_desc(&json)?;
    let base = path.parent().unwrap_or_else(|| Path::new("."));
    build_scene(&desc, base, options)
}

/// Resolve names and build a [`Scene`]. Relative paths resolve against `base`.
pub fn build_scene(desc: &SceneDesc, base: &Path, options: RenderOptions) -> Result<Scene> {
    let options = merge_options(options, desc.options.as_ref())?;
    let mut scene = Scene::with_options(options);
    let resolve = |p: &Path| if p.is_absolute() { p.to_path_buf() } else { base.join(p) };

    let mut textures = HashMap::new();
    for tex in &desc.textures {
        let id = scene.load_texture(&resolve(&tex.path))?;
        insert_unique(&mut textures, &tex.name, id, "texture")?;
    }

    let mut materials = HashMap::new();
    for mat in &desc.materials {
        let slot = |name: &Option<String>| -> Result<i32> {
            match name {
                Some(n) => lookup(&textures, n, "texture").map(|id| id as i32),
                None => Ok(NO_TEXTURE),
            }
        };
        let material = Material {
            base_color_tex: slot(&mat.base_color_texture)?,
            metallic_roughness_tex: slot(&mat.metallic_roughness_texture)?,
            normal_tex: slot(&mat.normal_texture)?,
            emission_tex: slot(&mat.emission_texture)?,
            ..mat.params
        };
        let id = scene.add_material(material);
        insert_unique(&mut materials, &mat.name, id, "material")?;
    }

    let mut meshes = HashMap::new();
    for m in &desc.meshes {
        let mesh = match &m.source {
            MeshSource::File { path } => load_obj_mesh(&resolve(path), m.name.clone())?,
            MeshSource::Inline {
                positions,
                indices,
                normals,
                uvs,
            } => {
                let positions: Vec<Vec3> = positions.iter().copied().map(Vec3::from).collect();
                let normals: Option<Vec<Vec3>> = normals.as_ref().map(|n| n.iter().copied().map(Vec3::from).collect());
                let uvs: Option<Vec<Vec2>> = uvs.as_ref().map(|u| u.iter().copied().map(Vec2::from).collect());
                Mesh::from_indexed(m.name.clone(), &positions, normals.as_deref(), uvs.as_deref(), indices)?
            }
        };
        let id = scene.add_mesh(mesh);
        insert_unique(&mut meshes, &m.name, id, "mesh")?;
    }

    for light in &desc.lights {
        scene.add_light(light.to_light());
    }

    for (i, inst) in desc.instances.iter().enumerate() {
        let mesh_id = lookup(&meshes, &inst.mesh, "mesh")?;
        let material_id = lookup(&materials, &inst.material, "material")?;
        let name = inst.name.clone().unwrap_or_else(|| format!("{}#{i}", inst.mesh));
        scene.add_instance(MeshInstance::new(name, mesh_id, material_id, inst.transform()));
    }

    if let Some(env) = &desc.environment {
        scene.load_environment_map(&resolve(env))?;
    }
    if let Some(cam) = &desc.camera {
        scene.set_camera(Camera::from_desc(cam));
    }

    Ok(scene)
}

/// Apply the keys present in `overrides` on top of `base`.
fn merge_options(base: RenderOptions, overrides: Option<&serde_json::Value>) -> Result<RenderOptions> {
    let Some(serde_json::Value::Object(over)) = overrides else {
        return match overrides {
            None => Ok(base),
            Some(_) => Err(Error::config("'options' must be an object")),
        };
    };
    let mut merged = serde_json::to_value(&base)?;
    if let serde_json::Value::Object(map) = &mut merged {
        for (k, v) in over {
            map.insert(k.clone(), v.clone());
        }
    }
    Ok(serde_json::from_value(merged)?)
}

fn insert_unique(map: &mut HashMap<String, usize>, name: &str, id: usize, what: &str) -> Result<()> {
    if map.insert(name.to_string(), id).is_some() {
        return Err(Error::config(format!("duplicate {what} name '{name}'")));
    }
    Ok(())
}

fn lookup(map: &HashMap<String, usize>, name: &str, what: &str) -> Result<usize> {
    map.get(name)
        .copied()
        .ok_or_else(|| Error::config(format!("unknown {what} '{name}'")))
}

#[cfg(test)]
mod tests {
    use super::*;

    const TRIANGLE: &str = r#"{
        "options": { "max_spp": 8, "resolution": [64, 32] },
        "materials": [{ "name": "white", "roughness": 0.2 }],
        "meshes": [{ "name": "tri", "positions": [[0,0,0],[1,0,0],[0,1,0]], "indices": [0,1,2] }],
        "lights": [{ "type": "sphere", "position": [0, 3, 0], "radius": 0.5, "emission": [4, 4, 4] }],
        "instances": [
            { "mesh": "tri", "material": "white" },
            { "mesh": "tri", "material": "white", "translate": [2, 0, 0], "scale": [2, 2, 2] }
        ]
    }"#;

    #[test]
    fn test_build_inline_scene() {
        let desc = parse_scene_desc(TRIANGLE).unwrap();
        let scene = build_scene(&desc, Path::new("."), RenderOptions::default()).unwrap();
        assert_eq!(scene.meshes().len(), 1);
        assert_eq!(scene.instances().len(), 2);
        assert_eq!(scene.lights().len(), 1);
        assert_eq!(scene.materials()[0].roughness, 0.2);
        assert_eq!(scene.options().max_spp, Some(8));
        assert_eq!(scene.options().resolution, [64, 32]);
        // Untouched keys keep the caller's values
        assert_eq!(scene.options().tile_width, 100);
        assert_eq!(
            scene.instances()[1].transform.transform_point3(Vec3::X),
            Vec3::new(4.0, 0.0, 0.0)
        );
    }

    #[test]
    fn test_unknown_material_rejected() {
        let json = r#"{
            "meshes": [{ "name": "tri", "positions": [[0,0,0],[1,0,0],[0,1,0]], "indices": [0,1,2] }],
            "instances": [{ "mesh": "tri", "material": "missing" }]
        }"#;
        let desc = parse_scene_desc(json).unwrap();
        let err = build_scene(&desc, Path::new("."), RenderOptions::default()).unwrap_err();
        assert!(matches!(err, Error::Configuration(ref m) if m.contains("missing")));
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let json = r#"{ "materials": [{ "name": "a" }, { "name": "a" }] }"#;
        let desc = parse_scene_desc(json).unwrap();
        assert!(build_scene(&desc, Path::new("."), RenderOptions::default()).is_err());
    }

    #[test]
    fn test_matrix_transform() {
        let inst: InstanceDesc = serde_json::from_str(
            r#"{ "mesh": "m", "material": "x",
                 "matrix": [1,0,0,0, 0,1,0,0, 0,0,1,0, 5,6,7,1] }"#,
        )
        .unwrap();
        assert_eq!(inst.transform().w_axis.truncate(), Vec3::new(5.0, 6.0, 7.0));
    }
}
