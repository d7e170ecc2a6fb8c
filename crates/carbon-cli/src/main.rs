//! `polopt-carbon`: carbon coefficient runs from the command line.
//!
//! ```text
//! polopt-carbon run      --config project.yaml --out outputs/
//! polopt-carbon validate --lulc lulc.tif --carbon-zones zones.geojson --boundary aoi.geojson
//! ```
//!
//! Settings come from an optional YAML file; flags override it.

mod config;
mod io;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{anyhow, Context, Result};
use carbon_core::zones::ZoneFieldError;
use carbon_core::{run, validate, AggregationMethod, CarbonError, LookupTables, RunInputs};
use clap::{Args, Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::config::Config;
use crate::io::table::RunInfo;

#[derive(Parser, Debug)]
#[command(name = "polopt-carbon", version, about = "Carbon coefficients for land-cover inside carbon zones")]
struct Cli {
    /// Debug logging (RUST_LOG takes precedence).
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the full pipeline and write every output.
    Run(RunArgs),
    /// Check inputs and tables without running the overlay.
    Validate(InputArgs),
}

#[derive(Args, Debug)]
struct InputArgs {
    /// YAML project configuration.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Country code recorded with the run.
    #[arg(long)]
    country: Option<String>,

    /// Classified LULC GeoTIFF.
    #[arg(long)]
    lulc: Option<PathBuf>,

    /// Carbon-zone polygons (GeoJSON).
    #[arg(long)]
    carbon_zones: Option<PathBuf>,

    /// Project boundary (GeoJSON).
    #[arg(long)]
    boundary: Option<PathBuf>,

    /// Crosswalk CSV merged over the built-in IGBP table.
    #[arg(long)]
    crosswalk: Option<PathBuf>,

    /// Coefficient lookup CSV consulted before the built-in table.
    #[arg(long)]
    coeff_lookup: Option<PathBuf>,

    /// Expert rules CSV evaluated before the built-in rules.
    #[arg(long)]
    expert_rules: Option<PathBuf>,

    /// `dominant` or `weighted`.
    #[arg(long)]
    method: Option<AggregationMethod>,

    /// Send wetland zones to their wetland coefficient.
    #[arg(long)]
    force_wetland_overrides: bool,
}

#[derive(Args, Debug)]
struct RunArgs {
    #[command(flatten)]
    inputs: InputArgs,

    /// Output folder.
    #[arg(short, long)]
    out: Option<PathBuf>,

    /// Replace existing outputs.
    #[arg(long)]
    overwrite: bool,

    /// Per-class c_above overrides for the carbon-pool table.
    #[arg(long)]
    class_overrides: Option<PathBuf>,
}

impl InputArgs {
    /// Load the config file (if any) and lay the flags over it.
    fn config(&self) -> Result<Config> {
        let mut cfg = match &self.config {
            Some(path) => Config::from_file(path)?,
            None => Config::default(),
        };
        let i = &mut cfg.inputs;
        for (slot, flag) in [
            (&mut i.lulc, &self.lulc),
            (&mut i.carbon_zones, &self.carbon_zones),
            (&mut i.boundary, &self.boundary),
            (&mut i.crosswalk, &self.crosswalk),
            (&mut i.coeff_lookup, &self.coeff_lookup),
            (&mut i.expert_rules, &self.expert_rules),
        ] {
            if flag.is_some() {
                slot.clone_from(flag);
            }
        }
        if let Some(country) = &self.country {
            cfg.project.country = country.clone();
        }
        if let Some(method) = self.method {
            cfg.project.method = method;
        }
        cfg.project.force_wetland_overrides |= self.force_wetland_overrides;
        Ok(cfg)
    }
}

fn required<'a>(path: &'a Option<PathBuf>, what: &str, flag: &str, key: &str) -> Result<&'a Path> {
    path.as_deref()
        .ok_or_else(|| anyhow!("no {what} given (pass {flag} or set inputs.{key})"))
}

fn load_tables(cfg: &Config) -> Result<LookupTables> {
    let mut tables = LookupTables::builtin();
    let i = &cfg.inputs;
    if let Some(path) = &i.crosswalk {
        tables = tables.with_crosswalk_csv(&path.display().to_string(), &io::read_text(path)?)?;
    }
    if let Some(path) = &i.coeff_lookup {
        tables = tables.with_coefficient_csv(&path.display().to_string(), &io::read_text(path)?)?;
    }
    if let Some(path) = &i.expert_rules {
        tables = tables.with_rules_csv(&path.display().to_string(), &io::read_text(path)?)?;
    }
    if let Some(path) = &i.class_overrides {
        tables = tables.with_class_overrides_csv(&path.display().to_string(), &io::read_text(path)?)?;
    }
    info!(
        crosswalk = tables.crosswalk.len(),
        rules = tables.rules.len(),
        overrides = tables.override_coefficients.as_ref().map_or(0, |t| t.len()),
        "lookup tables loaded"
    );
    Ok(tables)
}

fn load_inputs(cfg: &Config) -> Result<(RunInputs, Vec<ZoneFieldError>)> {
    let i = &cfg.inputs;
    let lulc_path = required(&i.lulc, "LULC raster", "--lulc", "lulc")?;
    let zones_path = required(&i.carbon_zones, "carbon-zone layer", "--carbon-zones", "carbon_zones")?;
    let boundary_path = required(&i.boundary, "boundary", "--boundary", "boundary")?;

    let lulc = io::raster::read_lulc(lulc_path)?;
    info!(path = %lulc_path.display(), width = lulc.width, height = lulc.height, crs = ?lulc.crs, "LULC raster read");
    let (zones, field_errors) = io::vector::read_zones(zones_path)?;
    info!(path = %zones_path.display(), zones = zones.zones.len(), crs = ?zones.crs, "carbon zones read");
    let boundary = io::vector::read_boundary(boundary_path)?;
    info!(path = %boundary_path.display(), crs = ?boundary.crs, "boundary read");

    Ok((RunInputs { lulc, zones, boundary }, field_errors))
}

fn cmd_validate(args: &InputArgs) -> Result<ExitCode> {
    let mut cfg = args.config()?;
    cfg.expand_paths();
    let tables = load_tables(&cfg)?;
    let (inputs, field_errors) = load_inputs(&cfg)?;

    let report = validate(&inputs, &tables, &cfg.run_options()).with_zone_field_errors(field_errors);
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(if report.is_valid { ExitCode::SUCCESS } else { ExitCode::FAILURE })
}

fn cmd_run(args: &RunArgs) -> Result<ExitCode> {
    let mut cfg = args.inputs.config()?;
    if let Some(out) = &args.out {
        cfg.outputs.folder = out.clone();
    }
    if args.class_overrides.is_some() {
        cfg.inputs.class_overrides.clone_from(&args.class_overrides);
    }
    cfg.project.overwrite |= args.overwrite;
    cfg.expand_paths();

    let o = &cfg.outputs;
    let table_path = o.resolve(&o.table);
    let results_json_path = table_path.with_extension("json");
    let geojson_path = o.resolve(&o.geojson);
    let density_path = o.resolve(&o.density);
    let overlay_path = o.resolve(&o.overlay);
    let class_table_path = o.resolve(&o.class_table);
    let run_info_path = o.folder.join("run_info.json");
    let outputs = [
        ("table", &table_path),
        ("results", &results_json_path),
        ("geojson", &geojson_path),
        ("density", &density_path),
        ("overlay", &overlay_path),
        ("class_table", &class_table_path),
        ("run_info", &run_info_path),
    ];
    // Every target is checked before inputs are read.
    for (_, path) in &outputs {
        io::prepare_output(path, cfg.project.overwrite)?;
    }

    let tables = load_tables(&cfg)?;
    let (inputs, field_errors) = load_inputs(&cfg)?;
    if !field_errors.is_empty() {
        for e in &field_errors {
            warn!(zone = %e.zone, fields = %e.fields.join(", "), "carbon zone is missing required fields");
        }
        let first = CarbonError::from(field_errors[0].clone());
        return Err(anyhow::Error::new(first)
            .context(format!("{} carbon zone(s) have missing or invalid attributes", field_errors.len())));
    }

    let output = run(&inputs, &tables, &cfg.run_options())?;
    let crs = output.summary.crs;

    io::table::write_results(&table_path, &output.rows)?;
    io::table::write_results_json(&results_json_path, &output.results)?;
    io::vector::write_features(&geojson_path, &output.features, crs)?;
    io::raster::write_density(&density_path, &output.density)?;
    io::table::write_overlay(&overlay_path, &output.overlay_rows)?;
    io::table::write_class_table(&class_table_path, &output.class_table)?;

    let i = &cfg.inputs;
    let info = RunInfo {
        version: env!("CARGO_PKG_VERSION"),
        inputs: BTreeMap::from([
            ("lulc", i.lulc.clone()),
            ("carbon_zones", i.carbon_zones.clone()),
            ("boundary", i.boundary.clone()),
            ("crosswalk", i.crosswalk.clone()),
            ("coeff_lookup", i.coeff_lookup.clone()),
            ("expert_rules", i.expert_rules.clone()),
            ("class_overrides", i.class_overrides.clone()),
        ]),
        outputs: outputs.iter().map(|(k, p)| (*k, (*p).clone())).collect(),
        summary: &output.summary,
    };
    io::table::write_run_info(&run_info_path, &info)?;

    info!(
        zones = output.summary.zone_count,
        units = output.summary.unit_count,
        total_area_ha = output.summary.total_area_ha,
        total_carbon_mg = output.summary.total_carbon_mg,
        folder = %cfg.outputs.folder.display(),
        "outputs written"
    );
    Ok(ExitCode::SUCCESS)
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)))
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match &cli.command {
        Command::Run(args) => cmd_run(args).context("run failed"),
        Command::Validate(args) => cmd_validate(args).context("validation failed"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_override_config_file() {
        let cli = Cli::try_parse_from([
            "polopt-carbon",
            "run",
            "--lulc",
            "other.tif",
            "--method",
            "dominant",
            "--country",
            "UGA",
            "--overwrite",
        ])
        .unwrap();
        let Command::Run(args) = cli.command else { panic!("expected run") };
        let cfg = args.inputs.config().unwrap();
        assert_eq!(cfg.inputs.lulc, Some(PathBuf::from("other.tif")));
        assert_eq!(cfg.project.method, AggregationMethod::Dominant);
        assert_eq!(cfg.project.country, "UGA");
        assert!(args.overwrite);
    }

    #[test]
    fn missing_input_names_the_flag() {
        let err = load_inputs(&Config::default()).unwrap_err();
        assert!(err.to_string().contains("--lulc"), "{err}");
    }

    #[test]
    fn unknown_method_is_a_usage_error() {
        assert!(Cli::try_parse_from(["polopt-carbon", "validate", "--method", "median"]).is_err());
    }
}
