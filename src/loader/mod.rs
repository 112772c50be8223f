//! Scene loaders selected by file extension.
//!
//! The registry maps lower-case extensions to a [`LoaderKind`]; callers may
//! register extra extensions for the built-in formats.

pub mod json;
pub mod obj;

use std::collections::HashMap;
use std::path::Path;

use crate::render::RenderOptions;
use crate::scene::Scene;
use crate::util::{Error, Result};

/// Built-in scene formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LoaderKind {
    /// JSON scene description (see [`json::SceneDesc`]).
    Json,
    /// Wavefront OBJ, one instance per object.
    Obj,
}

impl LoaderKind {
    fn load(self, path: &Path, options: RenderOptions) -> Result<Scene> {
        match self {
            LoaderKind::Json => json::load_json_scene(path, options),
            LoaderKind::Obj => obj::load_obj_scene(path, options),
        }
    }
}

/// Extension to loader table.
#[derive(Debug, Clone)]
pub struct LoaderRegistry {
    loaders: HashMap<String, LoaderKind>,
}

impl Default for LoaderRegistry {
    fn default() -> Self {
        let mut reg = Self {
            loaders: HashMap::new(),
        };
        reg.register("json", LoaderKind::Json);
        reg.register("scene", LoaderKind::Json);
        reg.register("obj", LoaderKind::Obj);
        reg
    }
}

impl LoaderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Map an extension (with or without leading dot) to a loader.
    pub fn register(&mut self, extension: &str, kind: LoaderKind) {
        let ext = extension.trim_start_matches('.').to_ascii_lowercase();
        self.loaders.insert(ext, kind);
    }

    pub fn kind_for(&self, path: &Path) -> Option<LoaderKind> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        self.loaders.get(&ext).copied()
    }

    /// Registered extensions, sorted.
    pub fn extensions(&self) -> Vec<&str> {
        let mut exts: Vec<&str> = self.loaders.keys().map(String::as_str).collect();
        exts.sort_unstable();
        exts
    }

    /// Load a scene. `options` are the base the file may override.
    #[tracing::instrument(skip(self, options), fields(path = %path.display()))]
    pub fn load(&self, path: &Path, options: RenderOptions) -> Result<Scene> {
        let kind = self.kind_for(path).ok_or_else(|| {
            Error::UnsupportedFormat(
                path.extension()
                    .map(|e| e.to_string_lossy().into_owned())
                    .unwrap_or_else(|| path.display().to_string()),
            )
        })?;
        if !path.exists() {
            return Err(Error::FileNotFound(path.to_path_buf()));
        }
        let scene = kind.load(path, options)?;
        tracing::info!(
            meshes = scene.meshes().len(),
            instances = scene.instances().len(),
            materials = scene.materials().len(),
            "scene loaded"
        );
        Ok(scene)
    }
}

/// Load a scene with the default registry and options.
pub fn load_scene(path: &Path) -> Result<Scene> {
    LoaderRegistry::default().load(path, RenderOptions::default())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_by_extension() {
        let reg = LoaderRegistry::default();
        assert_eq!(reg.kind_for(Path::new("a/b/room.JSON")), Some(LoaderKind::Json));
        assert_eq!(reg.kind_for(Path::new("teapot.obj")), Some(LoaderKind::Obj));
        assert_eq!(reg.kind_for(Path::new("scene.blend")), None);
        assert_eq!(reg.kind_for(Path::new("noext")), None);
    }

    #[test]
    fn test_register_extension() {
        let mut reg = LoaderRegistry::new();
        reg.register(".PTS", LoaderKind::Json);
        assert_eq!(reg.kind_for(Path::new("x.pts")), Some(LoaderKind::Json));
        assert!(reg.extensions().contains(&"pts"));
    }

    #[test]
    fn test_unsupported_format() {
        let err = load_scene(Path::new("model.glb")).unwrap_err();
        assert!(matches!(err, Error::UnsupportedFormat(ref e) if e == "glb"));
    }
}
