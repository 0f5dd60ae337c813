mod args;
mod coherence;
mod config;
mod frame;
mod plot;
mod read;
mod report;
mod resample;
mod series;
mod utils;

use clap::{CommandFactory, Parser};

use args::Args;
use coherence::scan_channels;
use config::{load_channel_list, Config};
use plot::{plot_coherence, plot_file_name};
use read::read_data;
use report::{report_path, write_report, StartTimeGroup};
use utils::{available_cpu_cores, gps_to_utc_label, DynError};

fn main() -> Result<(), DynError> {
    if std::env::args_os().len() == 1 {
        Args::command().print_help()?;
        println!();
        return Ok(());
    }

    let args = Args::parse();

    let mut config = Config::load(&args.config)?;
    config.apply_overrides(&args)?;
    config.validate()?;

    if args.cpu == 0 {
        return Err("--cpu must be at least 1".into());
    }
    let available_cores = available_cpu_cores();
    if args.cpu > available_cores {
        return Err(format!(
            "--cpu value ({}) exceeds the number of available cores ({})",
            args.cpu, available_cores
        )
        .into());
    }
    rayon::ThreadPoolBuilder::new()
        .num_threads(args.cpu)
        .build_global()
        .map_err(|_| "Failed to initialise rayon thread pool")?;

    let channels = load_channel_list(&config.wit_channels)?;
    if channels.is_empty() {
        println!(
            "[warn] Channel list {} is empty; the report will carry no rows",
            config.wit_channels.display()
        );
    }

    println!("Starting coherence scan with the following parameters:");
    println!("--------------------------------------------------");
    println!("  strain:     {}", config.strain_channel);
    println!(
        "  channels:   {} ({} names from {})",
        config.which_channels,
        channels.len(),
        config.wit_channels.display()
    );
    for start in &config.start_times {
        println!("  start:      {} ({})", start, gps_to_utc_label(*start)?);
    }
    println!("  duration:   {} s", config.duration);
    println!("  band:       {} .. {} Hz", config.fl, config.fh);
    println!(
        "  fftlength:  {} s (overlap {} s)",
        config.fftlength, config.overlap
    );
    println!("  threshold:  {}", config.threshold);
    println!("  frames:     {}", config.folder_path.display());
    println!("  results:    {}", config.output_path.display());
    println!("  plot:       {}", if args.plot { "true" } else { "false" });
    println!("  cpu:        {}", args.cpu);
    println!("--------------------------------------------------");

    std::fs::create_dir_all(&config.output_path).map_err(|e| {
        format!(
            "Failed to create output directory {}: {e}",
            config.output_path.display()
        )
    })?;

    let mut groups: Vec<StartTimeGroup> = Vec::with_capacity(config.start_times.len());
    for (index, &start_time) in config.start_times.iter().enumerate() {
        println!(
            "[info] Segment {}/{}: reading {} s from GPS {}",
            index + 1,
            config.start_times.len(),
            config.duration,
            start_time
        );
        let (strain, witnesses) = read_data(&config, &channels, start_time)?;
        println!(
            "[info] Strain at {} Hz; scanning {} witness channels",
            strain.sample_rate,
            channels.len()
        );
        let kept = scan_channels(&config, &channels, &strain, &witnesses)?;
        println!(
            "[info] {} of {} channels reached coherence {} in [{}, {}] Hz",
            kept.len(),
            channels.len(),
            config.threshold,
            config.fl,
            config.fh
        );

        if args.plot {
            for (row, spectrum) in &kept {
                let figure = plot_file_name(&config.output_path, &row.channel, start_time);
                plot_coherence(spectrum, &row.channel, config.threshold, &figure)?;
                println!("[info] Wrote {}", figure.display());
            }
        }

        groups.push(StartTimeGroup {
            start_time,
            duration: config.duration,
            rows: kept.into_iter().map(|(row, _)| row).collect(),
        });
    }

    let path = report_path(
        &config.output_path,
        &config.which_channels,
        config.fl,
        config.fh,
        config.start_times[0],
    );
    write_report(&path, &groups)?;
    println!("Maximum coherence values saved to {}", path.display());
    Ok(())
}
