//! pathtile CLI - inspect scenes, their flattened BVH and the tile schedule.

use std::env;
use std::path::Path;
use std::process::ExitCode;
use std::time::Instant;

use anyhow::{bail, Context};
use pathtile::bvh::NodeKind;
use pathtile::loader::LoaderRegistry;
use pathtile::render::{RenderOptions, TileGrid};
use pathtile::scene::Scene;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Keeps the chrome trace writer alive until exit.
struct TraceGuard {
    #[cfg(feature = "chrome-trace")]
    _chrome: Option<tracing_chrome::FlushGuard>,
}

fn init_tracing(level: &str) -> TraceGuard {
    let filter = EnvFilter::try_from_env("PATHTILE_LOG").unwrap_or_else(|_| EnvFilter::new(level));
    let registry = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr));

    #[cfg(feature = "chrome-trace")]
    if env::var("PATHTILE_TRACE").ok().as_deref() == Some("1") {
        let (chrome, guard) = tracing_chrome::ChromeLayerBuilder::new().file("trace.json").build();
        registry.with(chrome).init();
        return TraceGuard { _chrome: Some(guard) };
    }

    registry.init();
    TraceGuard {
        #[cfg(feature = "chrome-trace")]
        _chrome: None,
    }
}

fn main() -> ExitCode {
    let args: Vec<String> = env::args().collect();

    // Parse global flags
    let mut level = "info";
    let mut filtered_args: Vec<&str> = Vec::new();
    for arg in &args[1..] {
        match arg.as_str() {
            "-v" | "--verbose" => level = "debug",
            "-vv" | "--trace" => level = "trace",
            "-q" | "--quiet" => level = "error",
            _ => filtered_args.push(arg),
        }
    }
    let _guard = init_tracing(level);

    if filtered_args.is_empty() {
        print_help();
        return ExitCode::SUCCESS;
    }

    let result = match filtered_args[0] {
        "info" | "i" => match filtered_args.get(1) {
            Some(path) => cmd_info(Path::new(path)),
            None => usage("pathtile info <scene>"),
        },
        "bvh" | "b" => match filtered_args.get(1) {
            Some(path) => cmd_bvh(Path::new(path), filtered_args.contains(&"--nodes")),
            None => usage("pathtile bvh <scene> [--nodes]"),
        },
        "tiles" | "t" => cmd_tiles(&filtered_args[1..]),
        "version" | "--version" | "-V" => {
            print_version();
            Ok(())
        }
        "help" | "h" | "--help" | "-h" => {
            print_help();
            Ok(())
        }
        // A scene file on its own means 'info'
        other if Path::new(other).extension().is_some() => cmd_info(Path::new(other)),
        other => {
            eprintln!("Unknown command: {other}");
            eprintln!("Run 'pathtile help' for usage");
            return ExitCode::FAILURE;
        }
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn usage(text: &str) -> anyhow::Result<()> {
    bail!("missing argument\nUsage: {text}")
}

fn print_version() {
    println!(
        "pathtile {} (built {} {})",
        env!("CARGO_PKG_VERSION"),
        env!("PATHTILE_BUILD_DATE"),
        env!("PATHTILE_BUILD_TIME")
    );
}

fn print_help() {
    println!("pathtile - progressive tile path tracer toolkit");
    println!();
    println!("USAGE:");
    println!("    pathtile [OPTIONS] <COMMAND> [ARGS]");
    println!();
    println!("COMMANDS:");
    println!("    i, info  <scene>                 Load and process a scene, print a summary");
    println!("    b, bvh   <scene> [--nodes]       Flattened BVH layout, statistics and validation");
    println!("    t, tiles [w h [tw th]]           Tile grid and render order for a resolution");
    println!("    version                          Show version and build date");
    println!("    h, help                          Show this help");
    println!();
    println!("OPTIONS:");
    println!("    -v, --verbose    Show debug output");
    println!("    -vv, --trace     Show trace output (very verbose)");
    println!("    -q, --quiet      Errors only");
    println!();
    println!("ENVIRONMENT:");
    println!("    PATHTILE_LOG     Log filter (overrides -v/-q), e.g. 'pathtile=debug'");
    #[cfg(feature = "chrome-trace")]
    println!("    PATHTILE_TRACE   Set to 1 to write a chrome trace to trace.json");
    println!();
    println!("Supported scene formats: {}", LoaderRegistry::default().extensions().join(", "));
    if let Some(path) = RenderOptions::user_path() {
        println!("User options: {}", path.display());
    }
}

fn load_processed(path: &Path) -> anyhow::Result<Scene> {
    let registry = LoaderRegistry::default();
    let start = Instant::now();
    let mut scene = registry
        .load(path, RenderOptions::load_user())
        .with_context(|| format!("failed to load {}", path.display()))?;
    let loaded = start.elapsed();
    scene.process().context("failed to process scene")?;
    tracing::debug!(load = ?loaded, total = ?start.elapsed(), "scene ready");
    Ok(scene)
}

fn cmd_info(path: &Path) -> anyhow::Result<()> {
    let scene = load_processed(path)?;

    let triangles: usize = scene.meshes().iter().map(|m| m.triangle_count()).sum();
    let vertices: usize = scene.meshes().iter().map(|m| m.vertex_count()).sum();
    let opts = scene.options();

    println!("Scene: {}", path.display());
    println!();
    println!("Contents:");
    println!("  Meshes:    {} ({} vertices, {} triangles)", scene.meshes().len(), vertices, triangles);
    println!("  Instances: {}", scene.instances().len());
    println!("  Materials: {}", scene.materials().len());
    println!("  Lights:    {}", scene.lights().len());
    println!("  Textures:  {}", scene.textures().len());
    match scene.environment_map() {
        Some(env) => println!("  Env map:   {} ({}x{})", env.name, env.width(), env.height()),
        None => println!("  Env map:   none"),
    }
    println!();

    let b = scene.bounds();
    if b.is_empty() {
        println!("Bounds: empty");
    } else {
        println!("Bounds: {:?} .. {:?}", b.min.to_array(), b.max.to_array());
    }
    if let Some(cam) = scene.camera() {
        println!(
            "Camera: pos {:?} fov {:.1} deg",
            cam.position.to_array(),
            cam.fov.to_degrees()
        );
    }
    println!();

    println!("Render options:");
    println!("  Resolution: {}x{} (tiles {}x{})", opts.width(), opts.height(), opts.tile_width, opts.tile_height);
    match opts.max_spp {
        Some(n) => println!("  Samples:    {n}"),
        None => println!("  Samples:    unlimited"),
    }
    println!("  Depth:      {} (preview {})", opts.max_depth, opts.preview_max_depth);
    println!("  Denoiser:   {}", if opts.enable_denoiser { "on" } else { "off" });
    println!();

    println!(
        "Device arrays: {} nodes, {:.2} MB",
        scene.flattener().nodes().len(),
        (scene.flattener().node_bytes().len() + scene.buffers().byte_size()) as f64 / (1024.0 * 1024.0)
    );
    Ok(())
}

fn cmd_bvh(path: &Path, dump_nodes: bool) -> anyhow::Result<()> {
    let scene = load_processed(path)?;
    let flat = scene.flattener();
    let stats = flat.stats();

    println!("Nodes:           {}", flat.nodes().len());
    println!("  internal:      {}", stats.internal);
    println!("  geometry leaf: {}", stats.geometry_leaves);
    println!("  instance leaf: {}", stats.instance_leaves);
    println!("Top-level index: {}", flat.top_level_index());
    println!("Instances:       {}", flat.instance_count());
    println!();

    println!("Meshes:");
    for (i, mesh) in scene.meshes().iter().enumerate() {
        println!(
            "  [{i}] {:<24} root {:>6}  tris {:>6} @ {}",
            mesh.name,
            flat.blas_root_offsets()[i],
            mesh.triangle_count(),
            flat.tri_offsets()[i]
        );
    }

    if dump_nodes {
        println!();
        for (i, node) in flat.nodes().iter().enumerate() {
            let b = node.bounds();
            let kind = match node.kind() {
                NodeKind::Internal { left, right } => format!("internal {left} {right}"),
                NodeKind::Geometry { first_tri, tri_count } => format!("leaf tris {first_tri}+{tri_count}"),
                NodeKind::Instance {
                    blas_root,
                    material_id,
                    instance_id,
                } => format!("instance {instance_id} root {blas_root} mat {material_id}"),
            };
            let marker = if i == flat.top_level_index() { " <- top level" } else { "" };
            println!("{i:>6}  {kind:<36} {:?} .. {:?}{marker}", b.min.to_array(), b.max.to_array());
        }
    }

    println!();
    match flat.validate() {
        Ok(()) => println!("Validation: OK"),
        Err(e) => bail!("validation failed: {e}"),
    }
    Ok(())
}

fn cmd_tiles(args: &[&str]) -> anyhow::Result<()> {
    let nums = args
        .iter()
        .map(|s| s.parse::<u32>().with_context(|| format!("not a number: {s}")))
        .collect::<anyhow::Result<Vec<_>>>()?;

    let mut opts = RenderOptions::load_user();
    match nums.as_slice() {
        [] => {}
        [w, h] => opts.resolution = [*w, *h],
        [w, h, tw, th] => {
            opts.resolution = [*w, *h];
            opts.tile_width = *tw;
            opts.tile_height = *th;
        }
        _ => return usage("pathtile tiles [w h [tw th]]"),
    }
    opts.sanitize();

    let grid = TileGrid::new(opts.width(), opts.height(), opts.tile_width, opts.tile_height);
    println!(
        "Image {}x{}, tiles {}x{} -> {} cols x {} rows = {} tiles per sample",
        grid.image_width,
        grid.image_height,
        grid.tile_width,
        grid.tile_height,
        grid.cols,
        grid.rows,
        grid.tile_count()
    );
    let (pw, ph) = opts.preview_size();
    println!("Preview {pw}x{ph}");
    println!();
    println!("Order (cursor -> pixel rect):");
    for (i, cursor) in grid.pass().enumerate() {
        let t = grid.tile(cursor);
        println!(
            "  {i:>4}  ({:>3},{:>3})  x {:>5} y {:>5}  {}x{}",
            cursor.x, cursor.y, t.x, t.y, t.width, t.height
        );
    }
    Ok(())
}
