use std::path::{Path, PathBuf};

use pointmesh_core::{FusionPolicy, GridMode, ReconstructionConfig, DEFAULT_GROWTH_MARGIN};
use tracing_subscriber::filter::LevelFilter;

use crate::logging::parse_level;

pub const USAGE: &str = "\
Usage: pointmesh --input <cloud.ply> [--input <cloud.ply> ...] [options]

Each input is one point-cloud frame, reconstructed in order.

Options:
  --input <path>          PLY point cloud (repeatable)
  --output <path>         write the last mesh as OBJ
  --config <path>         JSON reconstruction config
  --resolution <float>    voxel edge length
  --truncation <float>    signed distance band
  --threshold <float>     isosurface level
  --fusion <mode>         weighted | min
  --persistent            keep fusing into one growing grid across frames
  --growth-margin <n>     voxels of slack before a persistent grid grows
  --serial                run on one thread in point and cell order
  --print-stats           print each cycle's statistics as a JSON line
  --log-level <level>     off | error | warn | info | debug | trace
  --help                  show this message";

#[derive(Debug, Clone, PartialEq)]
pub struct CliArgs {
    pub inputs: Vec<PathBuf>,
    pub output: Option<PathBuf>,
    pub config_path: Option<PathBuf>,
    pub resolution: Option<f32>,
    pub truncation: Option<f32>,
    pub threshold: Option<f32>,
    pub fusion: Option<FusionPolicy>,
    pub persistent: bool,
    pub growth_margin: Option<usize>,
    pub serial: bool,
    pub print_stats: bool,
    pub log_level: LevelFilter,
}

/// `Ok(None)` means help was requested.
pub fn parse_args(args: &[String]) -> Result<Option<CliArgs>, String> {
    let mut parsed = CliArgs {
        inputs: Vec::new(),
        output: None,
        config_path: None,
        resolution: None,
        truncation: None,
        threshold: None,
        fusion: None,
        persistent: false,
        growth_margin: None,
        serial: false,
        print_stats: false,
        log_level: LevelFilter::INFO,
    };
    let mut iter = args.iter();

    while let Some(arg) = iter.next() {
        let mut value = |flag: &str| {
            iter.next()
                .map(String::as_str)
                .ok_or_else(|| format!("{flag} requires a value"))
        };
        let flag = arg.as_str();
        match flag {
            "--input" | "-i" => parsed.inputs.push(PathBuf::from(value(flag)?)),
            "--output" | "-o" => parsed.output = Some(PathBuf::from(value(flag)?)),
            "--config" => parsed.config_path = Some(PathBuf::from(value(flag)?)),
            "--resolution" => parsed.resolution = Some(parse_number(flag, value(flag)?)?),
            "--truncation" => parsed.truncation = Some(parse_number(flag, value(flag)?)?),
            "--threshold" => parsed.threshold = Some(parse_number(flag, value(flag)?)?),
            "--fusion" => {
                parsed.fusion = Some(match value(flag)? {
                    "weighted" | "weighted_average" => FusionPolicy::WeightedAverage,
                    "min" | "min_replace" => FusionPolicy::MinReplace,
                    other => return Err(format!("unknown fusion mode '{other}'")),
                });
            }
            "--persistent" => parsed.persistent = true,
            "--growth-margin" => parsed.growth_margin = Some(parse_number(flag, value(flag)?)?),
            "--serial" => parsed.serial = true,
            "--print-stats" => parsed.print_stats = true,
            "--log-level" => parsed.log_level = parse_level(value(flag)?)?,
            "--help" | "-h" => return Ok(None),
            other => return Err(format!("unexpected argument '{other}'")),
        }
    }

    if parsed.inputs.is_empty() {
        return Err("at least one --input is required".to_string());
    }
    Ok(Some(parsed))
}

fn parse_number<T: std::str::FromStr>(flag: &str, value: &str) -> Result<T, String> {
    value
        .parse()
        .map_err(|_| format!("{flag} expects a number, got '{value}'"))
}

impl CliArgs {
    /// Config file first, then command-line overrides, then validation.
    pub fn build_config(&self) -> Result<ReconstructionConfig, String> {
        let mut config = match &self.config_path {
            Some(path) => load_config(path)?,
            None => ReconstructionConfig::default(),
        };
        if let Some(resolution) = self.resolution {
            config.resolution = resolution;
        }
        if let Some(truncation) = self.truncation {
            config.truncation = truncation;
        }
        if let Some(threshold) = self.threshold {
            config.surface_threshold = threshold;
        }
        if let Some(fusion) = self.fusion {
            config.fusion = fusion;
        }
        if self.persistent || self.growth_margin.is_some() {
            let current = match config.grid_mode {
                GridMode::Persistent { growth_margin } => growth_margin,
                GridMode::Rebuild => DEFAULT_GROWTH_MARGIN,
            };
            config.grid_mode = GridMode::Persistent {
                growth_margin: self.growth_margin.unwrap_or(current),
            };
        }
        config.serial |= self.serial;
        config.validate().map_err(|err| err.to_string())?;
        Ok(config)
    }
}

fn load_config(path: &Path) -> Result<ReconstructionConfig, String> {
    let text =
        std::fs::read_to_string(path).map_err(|err| format!("{}: {err}", path.display()))?;
    ReconstructionConfig::from_json_str(&text).map_err(|err| format!("{}: {err}", path.display()))
}
