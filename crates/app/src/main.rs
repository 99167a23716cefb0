use std::process;

use pointmesh_core::{Mesh, Reconstructor};
use tracing::{info, warn};

mod cli;
mod logging;
mod obj;
mod ply;

use cli::{CliArgs, USAGE};

fn main() {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let cli = match cli::parse_args(&args) {
        Ok(Some(cli)) => cli,
        Ok(None) => {
            println!("{USAGE}");
            return;
        }
        Err(err) => {
            eprintln!("error: {err}\n\n{USAGE}");
            process::exit(2);
        }
    };

    logging::setup_tracing(cli.log_level);
    info!("pointmesh starting");

    if let Err(err) = run(&cli) {
        eprintln!("error: {err}");
        process::exit(1);
    }
}

fn run(cli: &CliArgs) -> Result<(), String> {
    let config = cli.build_config()?;
    info!(
        resolution = config.resolution,
        truncation = config.truncation,
        threshold = config.surface_threshold,
        fusion = ?config.fusion,
        grid_mode = ?config.grid_mode,
        "reconstruction config"
    );
    let mut reconstructor = Reconstructor::new(config).map_err(|err| err.to_string())?;

    let mut latest: Option<Mesh> = None;
    for path in &cli.inputs {
        let batch = ply::load_point_cloud(path)?;
        info!(path = %path.display(), points = batch.len(), "loaded point cloud");
        match reconstructor.update(&batch) {
            Ok(Some(mesh)) => latest = Some(mesh),
            Ok(None) => warn!(path = %path.display(), "frame has no usable points"),
            Err(err) => warn!(path = %path.display(), %err, "reconstruction cycle failed"),
        }
        if cli.print_stats {
            if let Some(stats) = reconstructor.last_stats() {
                let json = serde_json::to_string(stats).map_err(|err| err.to_string())?;
                println!("{json}");
            }
        }
    }

    let mesh = latest.ok_or_else(|| "no frame produced a mesh".to_string())?;
    info!(
        vertices = mesh.vertex_count(),
        triangles = mesh.triangle_count(),
        "final mesh"
    );
    if let Some(output) = &cli.output {
        obj::write_obj(output, &mesh)?;
        info!(path = %output.display(), "wrote mesh");
    }
    Ok(())
}
