// args.rs - Command line surface definition

use clap::{Arg, ArgAction, Command};

fn verbosity() -> Arg {
    Arg::new("verbose")
        .short('v')
        .long("verbose")
        .action(ArgAction::Count)
        .help("Increase log verbosity (-v info, -vv debug)")
}

fn extend_options(command: Command) -> Command {
    command
        .arg(
            Arg::new("num-mismatches")
                .long("num-mismatches")
                .value_parser(clap::value_parser!(u32))
                .default_value("3")
                .help("Number of mismatches to accept in favour of recombination"),
        )
        .arg(
            Arg::new("hmm-cost-threshold")
                .long("hmm-cost-threshold")
                .value_parser(clap::value_parser!(f64))
                .default_value("5")
                .help("Maximum HMM cost for samples to be included unconditionally"),
        )
        .arg(
            Arg::new("min-group-size")
                .long("min-group-size")
                .value_parser(clap::value_parser!(usize))
                .default_value("10")
                .help("Minimum size of reconsidered sample groups"),
        )
        .arg(
            Arg::new("min-root-mutations")
                .long("min-root-mutations")
                .value_parser(clap::value_parser!(usize))
                .default_value("2")
                .help("Minimum number of shared mutations for reconsidered groups"),
        )
        .arg(
            Arg::new("min-different-dates")
                .long("min-different-dates")
                .value_parser(clap::value_parser!(usize))
                .default_value("3")
                .help("Minimum number of distinct sample dates in reconsidered groups"),
        )
        .arg(
            Arg::new("max-mutations-per-sample")
                .long("max-mutations-per-sample")
                .value_parser(clap::value_parser!(f64))
                .help("Maximum mean mutations per sample in a reconsidered group (unset: no limit)"),
        )
        .arg(
            Arg::new("max-recurrent-mutations")
                .long("max-recurrent-mutations")
                .value_parser(clap::value_parser!(u32))
                .help("Maximum recurrent mutations in a reconsidered group (unset: no limit)"),
        )
        .arg(
            Arg::new("retrospective-window")
                .long("retrospective-window")
                .value_parser(clap::value_parser!(u32))
                .default_value("30")
                .help("Days in the past to reconsider cached matches"),
        )
        .arg(
            Arg::new("no-deletions-as-missing")
                .long("no-deletions-as-missing")
                .action(ArgAction::SetTrue)
                .help("Keep deletions as signal instead of masking them for matching"),
        )
        .arg(
            Arg::new("max-daily-samples")
                .long("max-daily-samples")
                .value_parser(clap::value_parser!(usize))
                .help("Subsample the day down to this many samples"),
        )
        .arg(
            Arg::new("max-missing-sites")
                .long("max-missing-sites")
                .value_parser(clap::value_parser!(usize))
                .help("Drop samples with more missing sites than this"),
        )
        .arg(
            Arg::new("random-seed")
                .long("random-seed")
                .value_parser(clap::value_parser!(u64))
                .default_value("42")
                .help("Random seed for subsampling"),
        )
        .arg(
            Arg::new("num-threads")
                .long("num-threads")
                .value_parser(clap::value_parser!(usize))
                .help("Worker threads for matching (default: all cores)"),
        )
        .arg(
            Arg::new("no-progress")
                .long("no-progress")
                .action(ArgAction::SetTrue)
                .help("Don't show progress bars"),
        )
        .arg(
            Arg::new("config")
                .long("config")
                .help("TOML configuration file; command line options take precedence"),
        )
}

pub fn build_cli() -> Command {
    Command::new("argrow")
        .version(crate::VERSION)
        .about("Incremental ancestral recombination graph inference for dated viral genomes")
        .subcommand_required(true)
        .arg_required_else_help(true)
        .subcommand(
            Command::new("initialise")
                .about("Create a new base ARG and an empty match database")
                .arg(Arg::new("arg").required(true).help("Output ARG file"))
                .arg(Arg::new("match-db").required(true).help("Output match database"))
                .arg(
                    Arg::new("reference")
                        .long("reference")
                        .required(true)
                        .help("Reference FASTA (single record)"),
                )
                .arg(
                    Arg::new("problematic-sites")
                        .long("problematic-sites")
                        .help("File listing site positions to exclude, one per line"),
                )
                .arg(verbosity()),
        )
        .subcommand(
            Command::new("import-alignments")
                .about("Import FASTA alignments into a store")
                .arg(Arg::new("store").required(true).help("Alignment store file"))
                .arg(
                    Arg::new("fastas")
                        .required(true)
                        .num_args(1..)
                        .help("FASTA files to import"),
                )
                .arg(
                    Arg::new("initialise")
                        .short('i')
                        .long("initialise")
                        .action(ArgAction::SetTrue)
                        .help("Create the store first"),
                )
                .arg(
                    Arg::new("reference-length")
                        .long("reference-length")
                        .value_parser(clap::value_parser!(usize))
                        .help("Reference length for a new store (default 29904)"),
                )
                .arg(
                    Arg::new("no-progress")
                        .long("no-progress")
                        .action(ArgAction::SetTrue),
                )
                .arg(verbosity()),
        )
        .subcommand(
            Command::new("import-metadata")
                .about("Convert a CSV metadata file into a metadata database")
                .arg(Arg::new("metadata").required(true).help("Input CSV file"))
                .arg(Arg::new("db").required(true).help("Output metadata database"))
                .arg(
                    Arg::new("sep")
                        .long("sep")
                        .default_value(",")
                        .help("Field separator (use 'tab' for TSV)"),
                )
                .arg(
                    Arg::new("include-strains")
                        .long("include-strains")
                        .help("Only import strains matching this regex"),
                )
                .arg(
                    Arg::new("exclude-strains")
                        .long("exclude-strains")
                        .help("Skip strains matching this regex"),
                )
                .arg(verbosity()),
        )
        .subcommand(
            Command::new("list-dates")
                .about("List the dates in a metadata database")
                .arg(Arg::new("metadata").required(true))
                .arg(
                    Arg::new("counts")
                        .long("counts")
                        .action(ArgAction::SetTrue)
                        .help("Show sample counts per date"),
                )
                .arg(
                    Arg::new("after")
                        .long("after")
                        .default_value("1900-01-01")
                        .help("Show dates equal to or after this value"),
                )
                .arg(
                    Arg::new("before")
                        .long("before")
                        .default_value("3000-01-01")
                        .help("Show dates before this value"),
                )
                .arg(verbosity()),
        )
        .subcommand(extend_options(
            Command::new("extend")
                .about("Extend a base ARG with the samples of one date")
                .arg(Arg::new("base").required(true).help("Base ARG file"))
                .arg(Arg::new("date").required(true).help("ISO date to process"))
                .arg(Arg::new("alignments").required(true).help("Alignment store"))
                .arg(Arg::new("metadata").required(true).help("Metadata database"))
                .arg(Arg::new("matches").required(true).help("Match database"))
                .arg(Arg::new("output").required(true).help("Output ARG file"))
                .arg(
                    Arg::new("force")
                        .short('f')
                        .long("force")
                        .action(ArgAction::SetTrue)
                        .help("Clear newer matches from the match database"),
                )
                .arg(verbosity()),
        ))
        .subcommand(
            Command::new("validate")
                .about("Check that an ARG reproduces the stored alignments of its samples")
                .arg(Arg::new("alignments").required(true))
                .arg(Arg::new("arg").required(true))
                .arg(
                    Arg::new("no-deletions-as-missing")
                        .long("no-deletions-as-missing")
                        .action(ArgAction::SetTrue),
                )
                .arg(verbosity()),
        )
        .subcommand(
            Command::new("run-match")
                .about("Run the HMM for named strains, printing JSON to stdout")
                .arg(Arg::new("alignments").required(true))
                .arg(Arg::new("arg").required(true))
                .arg(Arg::new("strains").required(true).num_args(1..))
                .arg(
                    Arg::new("num-mismatches")
                        .long("num-mismatches")
                        .value_parser(clap::value_parser!(u32))
                        .default_value("3"),
                )
                .arg(
                    Arg::new("direction")
                        .long("direction")
                        .value_parser(["forward", "reverse"])
                        .default_value("forward")
                        .help("Direction to run the HMM in"),
                )
                .arg(verbosity()),
        )
        .subcommand(
            Command::new("run-rematch-recombinants")
                .about("Re-run the HMM for the causal strains of every recombinant node")
                .arg(Arg::new("alignments").required(true))
                .arg(Arg::new("arg").required(true))
                .arg(
                    Arg::new("num-mismatches")
                        .short('k')
                        .long("num-mismatches")
                        .value_parser(clap::value_parser!(u32))
                        .action(ArgAction::Append)
                        .default_values(["3"])
                        .help("num-mismatches values to rematch with (repeatable)"),
                )
                .arg(verbosity()),
        )
        .subcommand(
            Command::new("info-alignments")
                .about("Information about an alignment store")
                .arg(Arg::new("store").required(true))
                .arg(verbosity()),
        )
        .subcommand(
            Command::new("info-metadata")
                .about("Information about a metadata database")
                .arg(Arg::new("metadata").required(true))
                .arg(verbosity()),
        )
        .subcommand(
            Command::new("info-matches")
                .about("Cost histogram of a match database")
                .arg(Arg::new("matches").required(true))
                .arg(verbosity()),
        )
        .subcommand(
            Command::new("info-arg")
                .about("Information about an inferred ARG")
                .arg(Arg::new("arg").required(true))
                .arg(
                    Arg::new("recombinants")
                        .short('R')
                        .long("recombinants")
                        .action(ArgAction::SetTrue)
                        .help("Also print the recombinant summary table"),
                )
                .arg(verbosity()),
        )
        .subcommand(
            Command::new("export-metadata")
                .about("Export sample metadata from an ARG as TSV")
                .arg(Arg::new("arg").required(true))
                .arg(verbosity()),
        )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parses_extend() {
        let matches = build_cli()
            .try_get_matches_from([
                "argrow",
                "extend",
                "base.arg",
                "2020-02-02",
                "a.db",
                "m.db",
                "match.db",
                "out.arg",
                "--num-mismatches",
                "4",
                "--max-daily-samples",
                "100",
                "-f",
            ])
            .unwrap();
        let sub = matches.subcommand_matches("extend").unwrap();
        assert_eq!(sub.get_one::<String>("date").unwrap(), "2020-02-02");
        assert_eq!(*sub.get_one::<u32>("num-mismatches").unwrap(), 4);
        assert_eq!(*sub.get_one::<usize>("max-daily-samples").unwrap(), 100);
        assert!(sub.get_flag("force"));
        // The optional gates default to unset
        assert!(sub.get_one::<u32>("max-recurrent-mutations").is_none());
    }

    #[test]
    fn test_cli_rejects_unknown_subcommand() {
        assert!(build_cli()
            .try_get_matches_from(["argrow", "frobnicate"])
            .is_err());
    }

    #[test]
    fn test_run_match_direction_is_validated() {
        assert!(build_cli()
            .try_get_matches_from([
                "argrow",
                "run-match",
                "a.db",
                "t.arg",
                "s1",
                "--direction",
                "sideways"
            ])
            .is_err());
    }
}
