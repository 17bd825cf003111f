use std::path::PathBuf;

use clap::{Arg, Command, value_parser};

pub(super) const CONSUME: &str = "consume";
pub(super) const PRODUCE: &str = "produce";
pub(super) const SCHEMA: &str = "schema";
pub(super) const OUTPUT: &str = "output";

pub(super) fn root_cli() -> Command {
    Command::new("shardflow")
        .about("Consumes every shard of a Kinesis stream with a bounded worker pool")
        .version(env!("SHARDFLOW_VERSION_INFO"))
        .subcommand_required(true)
        .arg_required_else_help(true)
        .subcommand(add_consume_subcommand())
        .subcommand(add_produce_subcommand())
        .subcommand(add_schema_subcommand())
}

fn add_consume_subcommand() -> Command {
    Command::new(CONSUME).about("Consume the stream and log every decoded record")
}

fn add_produce_subcommand() -> Command {
    Command::new(PRODUCE).about("Write demo records to the stream at a fixed interval")
}

fn add_schema_subcommand() -> Command {
    Command::new(SCHEMA)
        .about("Print the latest definition of the configured schema")
        .arg(
            Arg::new(OUTPUT)
                .long(OUTPUT)
                .short('o')
                .value_name("FILE")
                .help("Also write the definition to this file")
                .value_parser(value_parser!(PathBuf)),
        )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verify_cli() {
        root_cli().debug_assert();
    }

    #[test]
    fn test_schema_output() {
        let matches = root_cli()
            .try_get_matches_from(["shardflow", "schema", "--output", "demo.avsc"])
            .unwrap();
        let (name, args) = matches.subcommand().unwrap();
        assert_eq!(name, SCHEMA);
        assert_eq!(
            args.get_one::<PathBuf>(OUTPUT),
            Some(&PathBuf::from("demo.avsc"))
        );
    }

    #[test]
    fn test_subcommand_required() {
        assert!(root_cli().try_get_matches_from(["shardflow"]).is_err());
        assert!(
            root_cli()
                .try_get_matches_from(["shardflow", "consume", "--output", "x"])
                .is_err()
        );
    }
}
