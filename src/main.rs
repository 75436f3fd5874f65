// main.rs - CLI entry point

use std::collections::HashSet;
use std::io::BufReader;
use std::time::Instant;

use clap::parser::ValueSource;
use clap::ArgMatches;
use log::info;

use argrow::cli::{build_cli, compile_filters, require_file, validate_extend_options, ExtendConfig};
use argrow::core::extend::{extend, validate, ExtendOptions};
use argrow::core::hmm::{match_haplotypes, solve_num_mismatches, DEFAULT_LIKELIHOOD_THRESHOLD};
use argrow::core::preprocess::preprocess_strains;
use argrow::data::alignments::{AlignmentStore, StoreMode};
use argrow::data::arg::{pad_alignment, Arg, DEFAULT_SEQUENCE_LENGTH};
use argrow::data::matches::{Direction, MatchDb};
use argrow::data::metadata::MetadataDb;
use argrow::error::{ArgrowError, Result};
use argrow::output;

fn main() {
    if let Err(e) = run_main() {
        eprintln!("{}", e);
        std::process::exit(1);
    }
}

fn setup_logging(matches: &ArgMatches) {
    let level = match matches.get_count("verbose") {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Info,
        _ => log::LevelFilter::Debug,
    };
    env_logger::Builder::new()
        .filter_level(level)
        .format_timestamp_secs()
        .init();
}

fn run_main() -> Result<()> {
    let started = Instant::now();
    let matches = build_cli().get_matches();
    match matches.subcommand() {
        Some(("initialise", sub)) => run_initialise(sub),
        Some(("import-alignments", sub)) => run_import_alignments(sub),
        Some(("import-metadata", sub)) => run_import_metadata(sub),
        Some(("list-dates", sub)) => run_list_dates(sub),
        Some(("extend", sub)) => run_extend(sub, started),
        Some(("validate", sub)) => run_validate(sub),
        Some(("run-match", sub)) => run_run_match(sub),
        Some(("run-rematch-recombinants", sub)) => run_rematch_recombinants(sub),
        Some(("info-alignments", sub)) => run_info_alignments(sub),
        Some(("info-metadata", sub)) => run_info_metadata(sub),
        Some(("info-matches", sub)) => run_info_matches(sub),
        Some(("info-arg", sub)) => run_info_arg(sub),
        Some(("export-metadata", sub)) => run_export_metadata(sub),
        _ => unreachable!("subcommand is required"),
    }
}

fn arg_str<'a>(matches: &'a ArgMatches, name: &str) -> &'a str {
    matches
        .get_one::<String>(name)
        .map(String::as_str)
        .unwrap_or_default()
}

fn provenance_record() -> String {
    serde_json::json!({
        "software": {"name": "argrow", "version": argrow::VERSION},
        "parameters": {"args": std::env::args().skip(1).collect::<Vec<String>>()},
        "timestamp": chrono::Utc::now().to_rfc3339(),
    })
    .to_string()
}

fn run_initialise(matches: &ArgMatches) -> Result<()> {
    setup_logging(matches);
    let reference_path = arg_str(matches, "reference");
    require_file(reference_path, "reference FASTA")?;
    let file = std::fs::File::open(reference_path)?;
    let mut records = bio::io::fasta::Reader::new(BufReader::new(file)).records();
    let record = records
        .next()
        .ok_or_else(|| ArgrowError::Config("reference FASTA is empty".to_string()))?
        .map_err(ArgrowError::store_io)?;
    let reference = pad_alignment(&record.seq().to_ascii_uppercase());

    let mut excluded: HashSet<usize> = HashSet::new();
    if let Some(path) = matches.get_one::<String>("problematic-sites") {
        require_file(path, "problematic sites file")?;
        for line in std::fs::read_to_string(path)?.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let position: usize = line
                .parse()
                .map_err(|_| ArgrowError::Config(format!("bad site position '{}'", line)))?;
            excluded.insert(position);
        }
        info!("excluding {} problematic sites", excluded.len());
    }

    let mut arg = Arg::initial(&reference, &excluded)?;
    arg.add_provenance(provenance_record());
    arg.dump(arg_str(matches, "arg"))?;
    MatchDb::initialise(arg_str(matches, "match-db"))?;
    info!("new base ARG at {}", arg_str(matches, "arg"));
    Ok(())
}

fn run_import_alignments(matches: &ArgMatches) -> Result<()> {
    setup_logging(matches);
    let store_path = arg_str(matches, "store");
    let mut store = if matches.get_flag("initialise") {
        let length = matches
            .get_one::<usize>("reference-length")
            .copied()
            .unwrap_or(DEFAULT_SEQUENCE_LENGTH);
        AlignmentStore::initialise(store_path, length)?
    } else {
        AlignmentStore::open(store_path, StoreMode::ReadWrite)?
    };
    let show_progress = !matches.get_flag("no-progress");
    let fastas: Vec<&String> = matches
        .get_many::<String>("fastas")
        .map(|values| values.collect())
        .unwrap_or_default();
    for fasta in fastas {
        require_file(fasta, "FASTA file")?;
        let appended = store.append_fasta(fasta, show_progress)?;
        println!("{}: {} alignments imported", fasta, appended);
    }
    println!("{}", store);
    store.close();
    Ok(())
}

fn run_import_metadata(matches: &ArgMatches) -> Result<()> {
    setup_logging(matches);
    let csv = arg_str(matches, "metadata");
    require_file(csv, "metadata CSV")?;
    let sep = match arg_str(matches, "sep") {
        "tab" | "\\t" => b'\t',
        s if s.len() == 1 => s.as_bytes()[0],
        s => {
            return Err(ArgrowError::Config(format!(
                "separator must be one character or 'tab', got '{}'",
                s
            )))
        }
    };
    let (include, exclude) = compile_filters(
        matches.get_one::<String>("include-strains").map(String::as_str),
        matches.get_one::<String>("exclude-strains").map(String::as_str),
    )?;
    let db = MetadataDb::import_csv(
        csv,
        arg_str(matches, "db"),
        sep,
        include.as_ref(),
        exclude.as_ref(),
    )?;
    println!("{}", db);
    Ok(())
}

fn run_list_dates(matches: &ArgMatches) -> Result<()> {
    setup_logging(matches);
    let db = MetadataDb::open(arg_str(matches, "metadata"))?;
    let after = arg_str(matches, "after");
    let before = arg_str(matches, "before");
    for (date, count) in db.date_sample_counts() {
        if date.as_str() >= after && date.as_str() < before {
            if matches.get_flag("counts") {
                println!("{}\t{}", date, count);
            } else {
                println!("{}", date);
            }
        }
    }
    Ok(())
}

fn build_extend_options(matches: &ArgMatches) -> Result<ExtendOptions> {
    let mut options = ExtendOptions::default();
    let mut config = ExtendConfig::default();
    if let Some(path) = matches.get_one::<String>("config") {
        config = ExtendConfig::from_file(path)?;
        config.apply_to(&mut options);
    }
    let from_cli = |name: &str| matches.value_source(name) == Some(ValueSource::CommandLine);
    if from_cli("num-mismatches") {
        options.num_mismatches = *matches.get_one::<u32>("num-mismatches").unwrap_or(&3);
    }
    if from_cli("hmm-cost-threshold") {
        options.hmm_cost_threshold = *matches.get_one::<f64>("hmm-cost-threshold").unwrap_or(&5.0);
    }
    if from_cli("min-group-size") {
        options.min_group_size = *matches.get_one::<usize>("min-group-size").unwrap_or(&10);
    }
    if from_cli("min-root-mutations") {
        options.min_root_mutations = *matches.get_one::<usize>("min-root-mutations").unwrap_or(&2);
    }
    if from_cli("min-different-dates") {
        options.min_different_dates =
            *matches.get_one::<usize>("min-different-dates").unwrap_or(&3);
    }
    if from_cli("max-mutations-per-sample") {
        options.max_mutations_per_sample =
            matches.get_one::<f64>("max-mutations-per-sample").copied();
    }
    if from_cli("max-recurrent-mutations") {
        options.max_recurrent_mutations =
            matches.get_one::<u32>("max-recurrent-mutations").copied();
    }
    if from_cli("retrospective-window") {
        options.retrospective_window =
            *matches.get_one::<u32>("retrospective-window").unwrap_or(&30);
    }
    if matches.get_flag("no-deletions-as-missing") {
        options.deletions_as_missing = false;
    }
    if from_cli("max-daily-samples") {
        options.max_daily_samples = matches.get_one::<usize>("max-daily-samples").copied();
    }
    if from_cli("max-missing-sites") {
        options.max_missing_sites = matches.get_one::<usize>("max-missing-sites").copied();
    }
    if from_cli("random-seed") {
        options.random_seed = *matches.get_one::<u64>("random-seed").unwrap_or(&42);
    }
    options.show_progress = !matches.get_flag("no-progress");
    let threads = matches
        .get_one::<usize>("num-threads")
        .copied()
        .or(config.num_threads);
    if let Some(threads) = threads {
        rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .build_global()
            .map_err(|e| ArgrowError::Config(format!("cannot size the thread pool: {}", e)))?;
    }
    Ok(options)
}

fn run_extend(matches: &ArgMatches, started: Instant) -> Result<()> {
    setup_logging(matches);
    let date = arg_str(matches, "date");
    let options = build_extend_options(matches)?;
    validate_extend_options(&options, date)?;
    for (name, what) in [
        ("base", "base ARG"),
        ("alignments", "alignment store"),
        ("metadata", "metadata database"),
        ("matches", "match database"),
    ] {
        require_file(arg_str(matches, name), what)?;
    }

    let base = Arg::load(arg_str(matches, "base"))?;
    let alignment_store = AlignmentStore::open(arg_str(matches, "alignments"), StoreMode::Read)?;
    let metadata_db = MetadataDb::open(arg_str(matches, "metadata"))?;
    let mut match_db = MatchDb::open(arg_str(matches, "matches"))?;

    let newer = match_db.count_newer(date);
    if newer > 0 {
        if !matches.get_flag("force") {
            return Err(ArgrowError::Config(format!(
                "match database has {} rows newer than {}; rerun with --force to clear them",
                newer, date
            )));
        }
        let removed = match_db.delete_newer(date);
        info!("cleared {} newer matches", removed);
    }

    let mut arg = extend(
        &alignment_store,
        &metadata_db,
        &base,
        date,
        &mut match_db,
        &options,
    )?;
    arg.add_provenance(provenance_record());
    arg.dump(arg_str(matches, "output"))?;
    match_db.close()?;
    let summary = format!(
        "{}: {} samples, elapsed={:.2}m",
        date,
        arg.num_samples(),
        started.elapsed().as_secs_f64() / 60.0
    );
    info!("{}", summary);
    eprintln!("{}", summary);
    Ok(())
}

fn run_validate(matches: &ArgMatches) -> Result<()> {
    setup_logging(matches);
    let arg = Arg::load(arg_str(matches, "arg"))?;
    let store = AlignmentStore::open(arg_str(matches, "alignments"), StoreMode::Read)?;
    let deletions_as_missing = !matches.get_flag("no-deletions-as-missing");
    let checked = validate(&arg, &store, deletions_as_missing)?;
    println!("{} samples validated", checked);
    Ok(())
}

fn run_run_match(matches: &ArgMatches) -> Result<()> {
    setup_logging(matches);
    let arg = Arg::load(arg_str(matches, "arg"))?;
    let store = AlignmentStore::open(arg_str(matches, "alignments"), StoreMode::Read)?;
    let strains: Vec<String> = matches
        .get_many::<String>("strains")
        .map(|values| values.cloned().collect())
        .unwrap_or_default();
    let num_mismatches = *matches.get_one::<u32>("num-mismatches").unwrap_or(&3);
    let direction: Direction = arg_str(matches, "direction").parse()?;

    let sites_position = arg.sites_position();
    let mut samples = Vec::with_capacity(strains.len());
    for outcome in preprocess_strains(&strains, &store, &sites_position, false) {
        samples.push(outcome?);
    }
    let (mu, rho) = solve_num_mismatches(num_mismatches);
    let haplotypes: Vec<Vec<i8>> = samples.iter().map(|s| s.match_haplotype(true)).collect();
    let results = match_haplotypes(
        &arg,
        &haplotypes,
        mu,
        rho,
        DEFAULT_LIKELIHOOD_THRESHOLD,
        direction == Direction::Reverse,
    );
    for (sample, hmm_match) in samples.iter().zip(results) {
        let line = serde_json::json!({
            "strain": sample.strain,
            "num_mismatches": num_mismatches,
            "direction": direction.to_string(),
            "hmm_cost": hmm_match.cost(num_mismatches, arg.sequence_length),
            "match": hmm_match.to_metadata(),
        });
        println!("{}", line);
    }
    Ok(())
}

fn run_rematch_recombinants(matches: &ArgMatches) -> Result<()> {
    setup_logging(matches);
    let arg = Arg::load(arg_str(matches, "arg"))?;
    let store = AlignmentStore::open(arg_str(matches, "alignments"), StoreMode::Read)?;
    let recombinants = argrow::core::attach::get_recombinant_strains(&arg)?;
    info!(
        "{} recombinants, {} causal strains",
        recombinants.len(),
        recombinants.values().map(Vec::len).sum::<usize>()
    );
    let num_mismatches: Vec<u32> = matches
        .get_many::<u32>("num-mismatches")
        .map(|values| values.copied().collect())
        .unwrap_or_default();
    let sites_position = arg.sites_position();

    for (recombinant, strains) in recombinants {
        let mut samples = Vec::with_capacity(strains.len());
        for outcome in preprocess_strains(&strains, &store, &sites_position, false) {
            samples.push(outcome?);
        }
        let haplotypes: Vec<Vec<i8>> = samples.iter().map(|s| s.match_haplotype(true)).collect();
        for &k in &num_mismatches {
            let (mu, rho) = solve_num_mismatches(k);
            for direction in [Direction::Forward, Direction::Reverse] {
                let results = match_haplotypes(
                    &arg,
                    &haplotypes,
                    mu,
                    rho,
                    DEFAULT_LIKELIHOOD_THRESHOLD,
                    direction == Direction::Reverse,
                );
                for (sample, hmm_match) in samples.iter().zip(results) {
                    let line = serde_json::json!({
                        "recombinant": recombinant,
                        "strain": sample.strain,
                        "num_mismatches": k,
                        "direction": direction.to_string(),
                        "hmm_cost": hmm_match.cost(k, arg.sequence_length),
                        "match": hmm_match.to_metadata(),
                    });
                    println!("{}", line);
                }
            }
        }
    }
    Ok(())
}

fn run_info_alignments(matches: &ArgMatches) -> Result<()> {
    setup_logging(matches);
    let store = AlignmentStore::open(arg_str(matches, "store"), StoreMode::Read)?;
    println!("{}", store);
    Ok(())
}

fn run_info_metadata(matches: &ArgMatches) -> Result<()> {
    setup_logging(matches);
    let db = MetadataDb::open(arg_str(matches, "metadata"))?;
    println!("{}", db);
    Ok(())
}

fn run_info_matches(matches: &ArgMatches) -> Result<()> {
    setup_logging(matches);
    let db = MatchDb::open(arg_str(matches, "matches"))?;
    println!("{}", db);
    println!("last date = {}", db.last_date().unwrap_or_else(|| "-".to_string()));
    print!("{}", output::match_cost_histogram(&db));
    Ok(())
}

fn run_info_arg(matches: &ArgMatches) -> Result<()> {
    setup_logging(matches);
    let arg = Arg::load(arg_str(matches, "arg"))?;
    print!("{}", output::arg_summary(&arg)?);
    if matches.get_flag("recombinants") {
        print!("{}", output::recombinants_summary(&arg)?);
    }
    Ok(())
}

fn run_export_metadata(matches: &ArgMatches) -> Result<()> {
    setup_logging(matches);
    let arg = Arg::load(arg_str(matches, "arg"))?;
    print!("{}", output::export_metadata_tsv(&arg)?);
    Ok(())
}
