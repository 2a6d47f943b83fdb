use std::fs::{File, OpenOptions};
use std::process::ExitCode;

use clap::Parser;

use ddrescue_rs::cli::{Mode, RescueArgs};
use ddrescue_rs::diagnostics::{internal_error, show_error, show_error_with, show_file_error};
use ddrescue_rs::domain::Domain;
use ddrescue_rs::fill::{do_fill, FillOptions};
use ddrescue_rs::generate::{do_generate, GenerateOptions};
use ddrescue_rs::rescue::{RescueEngine, RescueError};
use ddrescue_rs::status_map::{StatusMap, StatusMapError};

fn main() -> ExitCode {
    let args = RescueArgs::parse();
    match run(&args) {
        Ok(code) => code,
        Err(code) => code,
    }
}

fn run(args: &RescueArgs) -> Result<ExitCode, ExitCode> {
    let command_line = std::env::args().collect::<Vec<_>>().join(" ");
    let mode = args.mode().map_err(|e| {
        show_error(&e);
        ExitCode::from(1)
    })?;

    let domain = build_domain(args)?;

    let size_source = match &mode {
        Mode::Generate => &args.outfile,
        _ => &args.infile,
    };
    let isize_ = std::fs::metadata(size_source)
        .map(|m| m.len() as i64)
        .unwrap_or(0);

    let hardbs = args.hardbs;
    let mut map = StatusMap::new(
        isize_,
        domain,
        args.mapfile.as_deref(),
        hardbs,
        args.complete_only,
        false,
        command_line.clone(),
    )
    .map_err(|e| map_status_map_error(&e))?;

    if args.verify_input_size && matches!(mode, Mode::Rescue) {
        let ok = map.logfile_exists() && isize_ > 0 && map.logfile_isize() < ddrescue_rs::block::MAX;
        if !ok {
            show_error("Can't verify input file size. Unfinished logfile or other error.");
            return Err(ExitCode::from(1));
        }
        if map.logfile_isize() != isize_ {
            show_error("Input file size differs from size calculated from logfile.");
            return Err(ExitCode::from(1));
        }
    }

    if args.retrim {
        reset_statuses(&mut map, &[ddrescue_rs::Status::NonScraped, ddrescue_rs::Status::BadSector], ddrescue_rs::Status::NonTrimmed);
    }
    if args.try_again {
        reset_statuses(
            &mut map,
            &[ddrescue_rs::Status::NonTrimmed, ddrescue_rs::Status::NonScraped],
            ddrescue_rs::Status::NonTried,
        );
    }

    let ifile = File::open(&args.infile).map_err(|e| {
        show_file_error(&args.infile.display().to_string(), "cannot open", Some(&e));
        ExitCode::from(1)
    })?;

    let mut open_opts = OpenOptions::new();
    open_opts.write(true).create(true);
    if args.truncate {
        open_opts.truncate(true);
    }
    let ofile = open_opts.open(&args.outfile).map_err(|e| {
        show_file_error(&args.outfile.display().to_string(), "cannot open", Some(&e));
        ExitCode::from(1)
    })?;

    let offset = args.output_position.unwrap_or(0) - args.input_position.unwrap_or(0);

    match mode {
        Mode::Rescue => {
            let opts = args.to_rescue_options().map_err(|e| {
                show_error(&e);
                ExitCode::from(1)
            })?;
            let mut engine = RescueEngine::new(
                map,
                opts,
                ifile,
                ofile,
                args.infile.clone(),
                offset,
                args.rate_log.as_deref(),
                args.read_log.as_deref(),
            )
            .map_err(|e| map_rescue_error(&e))?;
            let report = engine.run().map_err(|e| map_rescue_error(&e))?;
            if report.interrupted {
                return Ok(ExitCode::from(130));
            }
            if report.budget_exceeded() {
                show_error("rate, error, or timeout limit exceeded");
                return Err(ExitCode::from(1));
            }
            Ok(ExitCode::SUCCESS)
        }
        Mode::Fill(fill_types) => {
            let opts = FillOptions {
                softbs: hardbs * args.cluster,
                offset,
                fill_types,
                pattern: vec![0xFFu8],
            };
            let report = do_fill(&mut map, &ofile, &args.infile, &opts).map_err(|e| map_rescue_error(&e))?;
            if report.interrupted {
                return Ok(ExitCode::from(130));
            }
            Ok(ExitCode::SUCCESS)
        }
        Mode::Generate => {
            drop(ofile);
            let scan_file = File::open(&args.outfile).map_err(|e| {
                show_file_error(&args.outfile.display().to_string(), "cannot open", Some(&e));
                ExitCode::from(1)
            })?;
            let opts = GenerateOptions {
                softbs: hardbs * args.cluster,
                hardbs,
                offset,
            };
            let report = do_generate(&mut map, &scan_file, &opts).map_err(|e| map_rescue_error(&e))?;
            if report.interrupted {
                return Ok(ExitCode::from(130));
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn build_domain(args: &RescueArgs) -> Result<Domain, ExitCode> {
    let mut domain = match &args.domain_mapfile {
        None => Domain::everything(),
        Some(path) => {
            let contents = ddrescue_rs::status_map::mapfile::read_mapfile(path)
                .map_err(|e| map_mapfile_error(&e))?
                .ok_or_else(|| {
                    show_error(&format!("domain mapfile {} not found", path.display()));
                    ExitCode::from(1)
                })?;
            let blocks = contents
                .sblocks
                .into_iter()
                .filter(|sb| sb.status() == ddrescue_rs::Status::Finished)
                .map(|sb| sb.block());
            Domain::from_finished_blocks(blocks)
        }
    };
    if let Some(size) = args.domain_size {
        domain.crop_by_file_size(size);
    }
    Ok(domain)
}

fn reset_statuses(map: &mut StatusMap, from: &[ddrescue_rs::Status], to: ddrescue_rs::Status) {
    let targets: Vec<_> = map
        .sblocks()
        .iter()
        .filter(|sb| from.contains(&sb.status()))
        .map(|sb| sb.block())
        .collect();
    for b in targets {
        let _ = map.change_chunk_status(&b, to);
    }
}

fn map_status_map_error(e: &StatusMapError) -> ExitCode {
    match e {
        StatusMapError::Mapfile(m) => map_mapfile_error(m),
        StatusMapError::Internal(msg) => {
            internal_error(msg);
            ExitCode::from(3)
        }
    }
}

fn map_mapfile_error(e: &ddrescue_rs::status_map::mapfile::MapfileError) -> ExitCode {
    use ddrescue_rs::status_map::mapfile::MapfileError;
    match e {
        MapfileError::Io(io_err) => {
            show_error_with("mapfile I/O error", io_err);
            ExitCode::from(1)
        }
        other => {
            show_error(&format!("corrupt mapfile: {other}"));
            ExitCode::from(2)
        }
    }
}

fn map_rescue_error(e: &RescueError) -> ExitCode {
    match e {
        RescueError::Io(io_err) => {
            show_error_with("I/O error", io_err);
            ExitCode::from(1)
        }
        RescueError::Mapfile(m) => map_mapfile_error(m),
        RescueError::Internal(msg) => {
            internal_error(msg);
            ExitCode::from(3)
        }
        RescueError::Fatal(msg) => {
            show_error(msg);
            ExitCode::from(1)
        }
    }
}
