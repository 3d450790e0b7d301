use clap::{Arg, ArgAction, ArgMatches, Command};
use record_cache::cache::ListedEntry;
use record_cache::dns::descriptor::{FieldValue, fields_for};
use record_cache::dns::enums::{DNSResourceClass, DNSResourceType};
use record_cache::dns::resource::DNSResource;
use record_cache::{CacheConfig, CacheError, RecordCache};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

fn cli() -> Command {
    Command::new("record-cache")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Inspect and populate a persistent DNS record cache")
        .subcommand_required(true)
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("TOML configuration file (defaults to RECORD_CACHE_* variables)")
                .global(true),
        )
        .arg(
            Arg::new("file")
                .short('f')
                .long("file")
                .value_name("PATH")
                .help("Cache file, overriding the configuration")
                .global(true),
        )
        .arg(
            Arg::new("size")
                .short('s')
                .long("size")
                .value_name("BYTES")
                .help("Cache size in bytes, overriding the configuration")
                .value_parser(clap::value_parser!(usize))
                .global(true),
        )
        .arg(
            Arg::new("overwrite")
                .long("overwrite")
                .help("Replace an incompatible cache file")
                .action(ArgAction::SetTrue)
                .global(true),
        )
        .subcommand(Command::new("init").about("Create the cache file, or check an existing one"))
        .subcommand(
            Command::new("stats").about("Show space usage").arg(
                Arg::new("entries")
                    .long("entries")
                    .help("Also list every stored entry")
                    .action(ArgAction::SetTrue),
            ),
        )
        .subcommand(
            Command::new("lookup")
                .about("Resolve a name from the cache")
                .arg(Arg::new("name").required(true))
                .arg(Arg::new("type").short('t').long("type").default_value("A"))
                .arg(Arg::new("class").long("class").default_value("IN")),
        )
        .subcommand(
            Command::new("insert")
                .about("Store one record")
                .arg(Arg::new("name").required(true))
                .arg(Arg::new("type").required(true))
                .arg(
                    Arg::new("ttl")
                        .required(true)
                        .value_parser(clap::value_parser!(u32)),
                )
                .arg(Arg::new("fields").num_args(0..).trailing_var_arg(true))
                .arg(Arg::new("class").long("class").default_value("IN")),
        )
}

fn load_config(matches: &ArgMatches) -> Result<CacheConfig, Box<dyn std::error::Error>> {
    let mut config = match matches.get_one::<String>("config") {
        Some(path) => CacheConfig::from_toml_file(path)?,
        None => CacheConfig::from_env()?,
    };
    if let Some(file) = matches.get_one::<String>("file") {
        config.cache_file = PathBuf::from(file);
    }
    if let Some(size) = matches.get_one::<usize>("size") {
        config.cache_size = *size;
    }
    if matches.get_flag("overwrite") {
        config.overwrite_cache = true;
    }
    Ok(config)
}

fn open(config: &CacheConfig) -> RecordCache {
    match RecordCache::open(config) {
        Ok(cache) => cache,
        Err(e) => {
            eprintln!("Cannot open cache: {}", e);
            std::process::exit(e.init_code().unwrap_or(1));
        }
    }
}

fn print_record(record: &DNSResource) -> Result<(), CacheError> {
    let fields = record
        .fields()
        .map_err(|e| CacheError::Corrupt(e.to_string()))?
        .iter()
        .map(|f| f.to_string())
        .collect::<Vec<_>>()
        .join(" ");
    println!(
        "{}\t{}\t{:?}\t{:?}\t{}",
        record.name(),
        record.ttl,
        record.rclass,
        record.rtype,
        fields
    );
    Ok(())
}

fn print_entry(listed: &ListedEntry) {
    let fields = listed
        .record
        .fields
        .iter()
        .map(|f| f.to_string())
        .collect::<Vec<_>>()
        .join(" ");
    println!(
        "{:>8} {:>6} {}\t{}/{}\t{:?}\t{:?}\t{}",
        listed.entry.offset,
        listed.entry.length,
        listed.record.name,
        listed.entry.ttl,
        listed.entry.original_ttl,
        listed.record.rclass,
        listed.record.rtype,
        fields
    );
}

fn parse_record(matches: &ArgMatches) -> Result<DNSResource, Box<dyn std::error::Error>> {
    let name = matches
        .get_one::<String>("name")
        .map(String::as_str)
        .unwrap_or_default();
    let rtype: DNSResourceType = matches
        .get_one::<String>("type")
        .map(String::as_str)
        .unwrap_or_default()
        .parse()?;
    let rclass: DNSResourceClass = matches
        .get_one::<String>("class")
        .map(String::as_str)
        .unwrap_or("IN")
        .parse()?;
    let ttl = matches.get_one::<u32>("ttl").copied().unwrap_or_default();
    let texts: Vec<&String> = matches
        .get_many::<String>("fields")
        .unwrap_or_default()
        .collect();

    let kinds = fields_for(rtype).ok_or_else(|| format!("{:?} records cannot be cached", rtype))?;
    if kinds.len() != texts.len() {
        return Err(format!(
            "{:?} takes {} fields, got {}",
            rtype,
            kinds.len(),
            texts.len()
        )
        .into());
    }
    let fields = kinds
        .iter()
        .zip(texts)
        .map(|(kind, text)| FieldValue::parse_text(*kind, text))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(DNSResource::from_fields(name, rtype, rclass, ttl, &fields)?)
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let matches = cli().get_matches();
    let config = load_config(&matches)?;

    match matches.subcommand() {
        Some(("init", _)) => {
            let cache = open(&config);
            let usage = cache.usage()?;
            println!(
                "{}: {} bytes, {} entries",
                usage.path.display(),
                usage.capacity,
                usage.entries
            );
            cache.close()?;
        }
        Some(("stats", sub)) => {
            let cache = open(&config.for_inspection());
            let usage = cache.usage()?;
            println!("file:        {}", usage.path.display());
            println!("capacity:    {}", usage.capacity);
            println!("entries:     {}", usage.entries);
            println!("free nodes:  {}", usage.free_nodes);
            println!("blob bytes:  {}", usage.blob_bytes);
            println!("index bytes: {}", usage.index_bytes);
            println!("free bytes:  {}", usage.free_bytes());
            if sub.get_flag("entries") {
                for listed in cache.entries()? {
                    print_entry(&listed);
                }
            }
            cache.close()?;
        }
        Some(("lookup", sub)) => {
            let cache = open(&config.for_inspection());
            let name = sub
                .get_one::<String>("name")
                .map(String::as_str)
                .unwrap_or_default();
            let rtype: DNSResourceType = sub
                .get_one::<String>("type")
                .map(String::as_str)
                .unwrap_or("A")
                .parse()?;
            let rclass: DNSResourceClass = sub
                .get_one::<String>("class")
                .map(String::as_str)
                .unwrap_or("IN")
                .parse()?;
            let records = cache.lookup(name, rtype, rclass)?;
            if records.is_empty() {
                println!("{} {:?}: not cached", name, rtype);
            }
            for record in &records {
                print_record(record)?;
            }
            cache.close()?;
        }
        Some(("insert", sub)) => {
            let record = parse_record(sub)?;
            let cache = open(&config.for_inspection());
            let report = cache.add_records([&record])?;
            println!(
                "inserted {}, duplicates {}, refreshed {}, skipped {}, failed {}",
                report.inserted, report.duplicates, report.refreshed, report.skipped, report.failed
            );
            cache.close()?;
        }
        _ => unreachable!("subcommand_required is set"),
    }

    Ok(())
}
