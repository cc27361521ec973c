//! sisense-kit CLI - Sisense administration and migration
//!
//! Inspects one environment or migrates objects from a source environment
//! to a target environment.

use anyhow::Context;
use clap::Parser;
use serde::Serialize;
use serde_json::Value;
use sisense_kit::access::AccessManagement;
use sisense_kit::client::SisenseClient;
use sisense_kit::config::{
    parse_connection_map, parse_duration, CliArgs, Commands, LogFormat, WellcheckKind,
};
use sisense_kit::dashboard::{fetch_dashboard_shares, DashboardRow, Dashboards};
use sisense_kit::datamodel::Datamodels;
use sisense_kit::migration::{
    BatchPlan, DashboardMigrationOptions, DatamodelMigrationOptions, MigrationSummary, Migrator,
    Selection,
};
use sisense_kit::utils::flatten;
use sisense_kit::wellcheck::{FullWellcheck, Wellcheck};
use sisense_kit::SharedTransport;
use std::fs::OpenOptions;
use std::sync::{Arc, Mutex};
use tracing::info;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::EnvFilter;

fn main() {
    // Parse CLI arguments
    let args = CliArgs::parse();

    if let Err(e) = init_logging(&args) {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("Error: failed to start async runtime: {}", e);
            std::process::exit(1);
        }
    };

    match runtime.block_on(run(args)) {
        Ok(true) => {}
        Ok(false) => std::process::exit(1),
        Err(e) => {
            eprintln!("Error: {:#}", e);
            std::process::exit(1);
        }
    }
}

fn init_logging(args: &CliArgs) -> anyhow::Result<()> {
    let default_level = match args.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let writer = match &args.log_file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("opening log file {}", path.display()))?;
            BoxMakeWriter::new(Mutex::new(file))
        }
        None => BoxMakeWriter::new(std::io::stderr),
    };

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_ansi(args.log_file.is_none())
        .with_target(false);

    match args.log_format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Text => builder.init(),
    }
    Ok(())
}

/// Returns `Ok(false)` when a migration finished with failed items
async fn run(args: CliArgs) -> anyhow::Result<bool> {
    handle_command(&args.command, &args).await
}

async fn handle_command(command: &Commands, args: &CliArgs) -> anyhow::Result<bool> {
    match command {
        Commands::Users { email } => cmd_users(email.as_deref(), args).await,
        Commands::Groups { name, members } => cmd_groups(name.as_deref(), *members, args).await,
        Commands::Dashboards {
            id,
            name,
            shares,
            columns,
        } => cmd_dashboards(id.as_deref(), name.as_deref(), *shares, *columns, args).await,
        Commands::Datamodels {
            name,
            describe,
            security,
            unused_columns,
        } => cmd_datamodels(name.as_deref(), *describe, *security, *unused_columns, args).await,
        Commands::MigrateGroups { names, all } => cmd_migrate_groups(names, *all, args).await,
        Commands::MigrateUsers { emails, all } => cmd_migrate_users(emails, *all, args).await,
        Commands::MigrateDashboards {
            ids,
            names,
            all,
            action,
            republish,
            migrate_share,
            change_ownership,
            batch_size,
            pause,
        } => {
            let options = DashboardMigrationOptions::default()
                .with_action(*action)
                .with_republish(*republish)
                .with_shares(*migrate_share, *change_ownership)
                .with_batch(BatchPlan::new(*batch_size, parse_duration(pause)?));
            cmd_migrate_dashboards(ids, names, *all, &options, args).await
        }
        Commands::MigrateDatamodels {
            ids,
            names,
            all,
            action,
            new_title,
            dependencies,
            shares,
            connections,
            batch_size,
            pause,
        } => {
            let options = DatamodelMigrationOptions::default()
                .with_action(*action, new_title.clone())
                .with_dependencies(dependencies.clone())
                .with_shares(*shares)
                .with_provider_connections(parse_connection_map(connections)?)
                .with_batch(BatchPlan::new(*batch_size, parse_duration(pause)?));
            cmd_migrate_datamodels(ids, names, *all, &options, args).await
        }
        Commands::Wellcheck {
            dashboards,
            datamodels,
            check,
            max_fields,
        } => cmd_wellcheck(dashboards, datamodels, *check, *max_fields, args).await,
    }
}

fn source(args: &CliArgs) -> anyhow::Result<SharedTransport> {
    let config = args.source_config()?;
    let client = SisenseClient::new(&config).context("creating source client")?;
    info!(url = %client.base_url(), "connected to source environment");
    Ok(Arc::new(client))
}

fn migrator(args: &CliArgs) -> anyhow::Result<Migrator> {
    let target_config = args.target_config()?;
    let target = SisenseClient::new(&target_config).context("creating target client")?;
    info!(url = %target.base_url(), "connected to target environment");
    Ok(Migrator::new(source(args)?, Arc::new(target)))
}

/// Print rows as a table, as JSON with `--json`, or write them to `--csv`
fn emit<T: Serialize + ?Sized>(rows: &T, args: &CliArgs) -> anyhow::Result<()> {
    let value = serde_json::to_value(rows)?;
    if let Some(path) = &args.csv {
        flatten(&value)?.to_csv_file(path)?;
        println!("Wrote {}", path.display());
    } else if args.json {
        println!("{}", serde_json::to_string_pretty(&value)?);
    } else {
        let table = flatten(&value)?;
        if table.is_empty() {
            println!("No results.");
        } else {
            println!("{}", table.render_text());
        }
    }
    Ok(())
}

fn report(summary: &MigrationSummary, args: &CliArgs) -> anyhow::Result<bool> {
    if args.json {
        println!("{}", serde_json::to_string_pretty(summary)?);
    } else {
        println!("{}", summary);
        for item in &summary.failed {
            println!("  failed: {} ({})", item.name, item.reason);
        }
    }
    Ok(summary.is_clean())
}

async fn cmd_users(email: Option<&str>, args: &CliArgs) -> anyhow::Result<bool> {
    let access = AccessManagement::new(source(args)?);
    match email {
        Some(email) => emit(&access.get_user(email).await?, args)?,
        None => emit(&access.get_users_all().await?, args)?,
    }
    Ok(true)
}

async fn cmd_groups(name: Option<&str>, members: bool, args: &CliArgs) -> anyhow::Result<bool> {
    let access = AccessManagement::new(source(args)?);
    match name {
        Some(name) if members => emit(&access.users_per_group(name).await?, args)?,
        Some(name) => emit(&access.get_group(name).await?, args)?,
        None => emit(&access.users_per_group_all().await?, args)?,
    }
    Ok(true)
}

async fn cmd_dashboards(
    id: Option<&str>,
    name: Option<&str>,
    shares: bool,
    columns: bool,
    args: &CliArgs,
) -> anyhow::Result<bool> {
    let api = source(args)?;
    let dashboards = Dashboards::new(api.clone());
    match (id, name) {
        (Some(id), _) if shares => emit(&fetch_dashboard_shares(api.as_ref(), id).await?, args)?,
        (Some(id), _) => emit(&dashboards.get_dashboard_by_id(id).await?, args)?,
        (None, Some(name)) if columns => emit(&dashboards.get_dashboard_columns(name).await?, args)?,
        (None, Some(name)) if shares => emit(&dashboards.get_dashboard_share(name).await?, args)?,
        (None, Some(name)) => emit(&dashboards.get_dashboard_by_name(name).await?, args)?,
        (None, None) if shares => {
            emit(&AccessManagement::new(api).get_all_dashboard_shares().await?, args)?
        }
        (None, None) => {
            let rows: Vec<DashboardRow> = dashboards
                .get_all_dashboards()
                .await?
                .iter()
                .map(DashboardRow::from_listing)
                .collect();
            emit(&rows, args)?
        }
    }
    Ok(true)
}

async fn cmd_datamodels(
    name: Option<&str>,
    describe: bool,
    security: bool,
    unused_columns: bool,
    args: &CliArgs,
) -> anyhow::Result<bool> {
    let api = source(args)?;
    let datamodels = Datamodels::new(api.clone());
    let Some(name) = name else {
        emit(&datamodels.get_all_datamodels().await?, args)?;
        return Ok(true);
    };
    if describe {
        emit(&datamodels.describe_datamodel(name).await?, args)?;
    } else if security {
        emit(&datamodels.get_datasecurity(name).await?, args)?;
    } else if unused_columns {
        emit(&AccessManagement::new(api).get_unused_columns(name).await?, args)?;
    } else {
        let schema: Value = datamodels.get_datamodel(name).await?;
        emit(&schema, args)?;
    }
    Ok(true)
}

async fn cmd_migrate_groups(names: &[String], all: bool, args: &CliArgs) -> anyhow::Result<bool> {
    let migrator = migrator(args)?;
    let summary = if all {
        migrator.migrate_all_groups().await?
    } else {
        migrator.migrate_groups(names).await?
    };
    report(&summary, args)
}

async fn cmd_migrate_users(emails: &[String], all: bool, args: &CliArgs) -> anyhow::Result<bool> {
    let migrator = migrator(args)?;
    let summary = if all {
        migrator.migrate_all_users().await?
    } else {
        migrator.migrate_users(emails).await?
    };
    report(&summary, args)
}

async fn cmd_migrate_dashboards(
    ids: &[String],
    names: &[String],
    all: bool,
    options: &DashboardMigrationOptions,
    args: &CliArgs,
) -> anyhow::Result<bool> {
    let migrator = migrator(args)?;
    let summary = if all {
        migrator.migrate_all_dashboards(options).await?
    } else {
        let selection = Selection::from_lists(ids.to_vec(), names.to_vec())?;
        migrator.migrate_dashboards(&selection, options).await?
    };
    report(&summary, args)
}

async fn cmd_migrate_datamodels(
    ids: &[String],
    names: &[String],
    all: bool,
    options: &DatamodelMigrationOptions,
    args: &CliArgs,
) -> anyhow::Result<bool> {
    let migrator = migrator(args)?;
    let outcome = if all {
        migrator.migrate_all_datamodels(options).await?
    } else {
        let selection = Selection::from_lists(ids.to_vec(), names.to_vec())?;
        migrator.migrate_datamodels(&selection, options).await?
    };

    if args.json {
        println!("{}", serde_json::to_string_pretty(&outcome)?);
        return Ok(outcome.summary.is_clean() && outcome.shares_failed == 0);
    }
    let clean = report(&outcome.summary, args)?;
    if options.shares {
        println!(
            "shares migrated={} failed={}",
            outcome.shares_migrated, outcome.shares_failed
        );
    }
    Ok(clean && outcome.shares_failed == 0)
}

async fn cmd_wellcheck(
    dashboards: &[String],
    datamodels: &[String],
    check: WellcheckKind,
    max_fields: usize,
    args: &CliArgs,
) -> anyhow::Result<bool> {
    match check {
        WellcheckKind::Full => {}
        kind if kind.on_datamodels() && datamodels.is_empty() => {
            anyhow::bail!("--check {:?} needs at least one --datamodel", kind)
        }
        kind if !kind.on_datamodels() && dashboards.is_empty() => {
            anyhow::bail!("--check {:?} needs at least one --dashboard", kind)
        }
        _ => {}
    }

    let wellcheck = Wellcheck::new(source(args)?);
    match check {
        WellcheckKind::Structure => emit(&wellcheck.check_dashboard_structure(dashboards).await?, args)?,
        WellcheckKind::Widgets => emit(&wellcheck.check_dashboard_widget_counts(dashboards).await?, args)?,
        WellcheckKind::PivotFields => {
            emit(&wellcheck.check_pivot_widget_fields(dashboards, max_fields).await?, args)?
        }
        WellcheckKind::CustomTables => emit(&wellcheck.check_datamodel_custom_tables(datamodels).await?, args)?,
        WellcheckKind::IslandTables => emit(&wellcheck.check_datamodel_island_tables(datamodels).await?, args)?,
        WellcheckKind::RlsDatatypes => emit(&wellcheck.check_datamodel_rls_datatypes(datamodels).await?, args)?,
        WellcheckKind::ImportQueries => emit(&wellcheck.check_datamodel_import_queries(datamodels).await?, args)?,
        WellcheckKind::M2m => emit(&wellcheck.check_datamodel_m2m_relationships(datamodels).await?, args)?,
        WellcheckKind::Full => {
            let report = wellcheck.run_full_wellcheck(dashboards, datamodels, max_fields).await?;
            emit_full(&report, args)?;
        }
    }
    Ok(true)
}

/// The full report as one JSON document, or one titled table per check
fn emit_full(report: &FullWellcheck, args: &CliArgs) -> anyhow::Result<()> {
    if args.csv.is_some() {
        anyhow::bail!("--csv needs a single --check; use --json for the full wellcheck");
    }
    if args.json {
        println!("{}", serde_json::to_string_pretty(report)?);
        return Ok(());
    }
    let d = &report.dashboards;
    let m = &report.datamodels;
    let sections: [(&str, Value); 9] = [
        ("Dashboard structure", serde_json::to_value(&d.structure)?),
        ("Widget counts", serde_json::to_value(&d.widget_counts)?),
        ("Pivot widget fields", serde_json::to_value(&d.pivot_widget_fields)?),
        ("Custom tables", serde_json::to_value(&m.custom_tables)?),
        ("Island tables", serde_json::to_value(&m.island_tables)?),
        ("Data security datatypes", serde_json::to_value(&m.rls_datatypes)?),
        ("Import queries", serde_json::to_value(&m.import_queries)?),
        ("Many-to-many relationships", serde_json::to_value(&m.m2m_relationships)?),
        ("Unused columns", serde_json::to_value(&m.unused_columns)?),
    ];
    for (heading, rows) in &sections {
        let table = flatten(rows)?;
        if table.is_empty() {
            continue;
        }
        println!("== {} ==", heading);
        println!("{}\n", table.render_text());
    }
    Ok(())
}
