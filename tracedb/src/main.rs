#![cfg_attr(test, allow(clippy::disallowed_methods))]
// Forbid unwrap() in production code to prevent panics from corrupt data.
// Test code is allowed to use unwrap() for convenience.
#![cfg_attr(not(test), deny(clippy::unwrap_used))]

use std::process::ExitCode;

use tracedb::config::StoreConfig;
use tracedb::db::{DatabaseError, GroupBy, SortKey, SortOrder, TraceQuery, open_databases};
use tracedb::records::NewTrace;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const USAGE: &str = "\
usage: tracedb <command>

  log <project> <function> <duration_ms> [ram_bytes] [message]
  get <id>
  list [project]
  range <low> <high>
  query <project> [duration|ram <min> <max>]... [--sort id|duration|ram|function]
        [--desc] [--offset n] [--limit n]
  stats <project> [function|version]
  delete <id>
  project create <user> <name>
  project list <user>
  project thresholds <id> <fast_ms> <normal_ms>
  project rename <id> <name>
  project delete <id>
  dump";

/// A parsed command line.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Command {
    Log(NewTrace),
    Get(u64),
    List(Option<u32>),
    Range(u64, u64),
    Query(u32, TraceQuery),
    Stats(u32, GroupBy),
    Delete(u64),
    ProjectCreate { owner_id: u32, name: String },
    ProjectList(u32),
    ProjectThresholds { project_id: u32, fast_ms: u32, normal_ms: u32 },
    ProjectRename { project_id: u32, name: String },
    ProjectDelete(u32),
    Dump,
}

fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tracedb=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let command = match parse_command(&args) {
        Ok(command) => command,
        Err(message) => {
            eprintln!("{message}\n\n{USAGE}");
            return ExitCode::from(2);
        }
    };

    // Load configuration from environment variables
    let config = match StoreConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("Failed to load configuration: {e}");
            return ExitCode::FAILURE;
        }
    };

    tracing::debug!(
        "Loaded configuration: database_directory={}, max_degree={:?}",
        config.database_directory.display(),
        config.max_degree
    );

    match run(&config, command) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{e}");
            ExitCode::FAILURE
        }
    }
}

fn run(config: &StoreConfig, command: Command) -> Result<(), DatabaseError> {
    let (traces, projects) = open_databases(config)?;

    match command {
        Command::Log(trace) => {
            let project = projects.get(trace.project_id)?;
            let duration_ms = trace.duration_ms;
            let id = traces.log_event(trace)?;
            match project {
                Some(project) => println!("logged trace {id} ({})", project.classify(duration_ms)),
                None => println!("logged trace {id}"),
            }
        }
        Command::Get(id) => match traces.get(id)? {
            Some(entry) => println!("{entry}"),
            None => println!("trace {id} not found"),
        },
        Command::List(project) => {
            let entries = match project {
                Some(project_id) => traces.for_project(project_id)?,
                None => traces.all()?,
            };
            print_all(&entries);
        }
        Command::Range(low, high) => print_all(&traces.range(low, high)?),
        Command::Query(project_id, query) => print_all(&traces.select(project_id, &query)?),
        Command::Stats(project_id, group_by) => print_all(&traces.stats(project_id, group_by)?),
        Command::Delete(id) => {
            if traces.delete(id)? {
                println!("deleted trace {id}");
            } else {
                println!("trace {id} not found");
            }
        }
        Command::ProjectCreate { owner_id, name } => {
            println!("{}", projects.create(owner_id, &name)?);
        }
        Command::ProjectList(owner_id) => print_all(&projects.for_user(owner_id)?),
        Command::ProjectThresholds {
            project_id,
            fast_ms,
            normal_ms,
        } => {
            if projects.update_thresholds(project_id, fast_ms, normal_ms)? {
                println!("project {project_id}: fast <= {fast_ms} ms, normal <= {normal_ms} ms");
            } else {
                println!("project {project_id} not found");
            }
        }
        Command::ProjectRename { project_id, name } => {
            if projects.rename(project_id, &name)? {
                println!("project {project_id} renamed");
            } else {
                println!("project {project_id} not found");
            }
        }
        Command::ProjectDelete(project_id) => {
            if projects.delete(project_id)? {
                let removed = traces.delete_project(project_id)?;
                println!("deleted project {project_id} and {removed} traces");
            } else {
                println!("project {project_id} not found");
            }
        }
        Command::Dump => print!("{}", traces.dump()?),
    }

    Ok(())
}

fn print_all<T: std::fmt::Display>(items: &[T]) {
    for item in items {
        println!("{item}");
    }
    println!("({} rows)", items.len());
}

fn parse_command(args: &[String]) -> Result<Command, String> {
    let args: Vec<&str> = args.iter().map(String::as_str).collect();

    let command = match args.as_slice() {
        ["log", project, function, duration, rest @ ..] if rest.len() <= 2 => {
            let mut trace = NewTrace::new(number(project)?, function, number(duration)?);
            if let Some(ram) = rest.first() {
                trace = trace.ram_bytes(number(ram)?);
            }
            if let Some(message) = rest.get(1) {
                trace = trace.message(message);
            }
            Command::Log(trace)
        }
        ["get", id] => Command::Get(number(id)?),
        ["list"] => Command::List(None),
        ["list", project] => Command::List(Some(number(project)?)),
        ["range", low, high] => Command::Range(number(low)?, number(high)?),
        ["query", project, rest @ ..] => Command::Query(number(project)?, parse_query(rest)?),
        ["stats", project] => Command::Stats(number(project)?, GroupBy::Function),
        ["stats", project, group] => {
            let group_by = match *group {
                "function" => GroupBy::Function,
                "version" => GroupBy::AppVersion,
                other => return Err(format!("unknown stats grouping '{other}'")),
            };
            Command::Stats(number(project)?, group_by)
        }
        ["delete", id] => Command::Delete(number(id)?),
        ["project", "create", owner, name] => Command::ProjectCreate {
            owner_id: number(owner)?,
            name: (*name).to_string(),
        },
        ["project", "list", owner] => Command::ProjectList(number(owner)?),
        ["project", "thresholds", id, fast, normal] => Command::ProjectThresholds {
            project_id: number(id)?,
            fast_ms: number(fast)?,
            normal_ms: number(normal)?,
        },
        ["project", "rename", id, name] => Command::ProjectRename {
            project_id: number(id)?,
            name: (*name).to_string(),
        },
        ["project", "delete", id] => Command::ProjectDelete(number(id)?),
        ["dump"] => Command::Dump,
        [] => return Err("missing command".to_string()),
        _ => return Err(format!("unrecognized arguments: {}", args.join(" "))),
    };

    Ok(command)
}

fn parse_query(mut rest: &[&str]) -> Result<TraceQuery, String> {
    let mut query = TraceQuery::default();
    loop {
        rest = match rest {
            [] => return Ok(query),
            ["duration", min, max, tail @ ..] => {
                query.filter = query.filter.duration(number(min)?..=number(max)?);
                tail
            }
            ["ram", min, max, tail @ ..] => {
                query.filter = query.filter.ram(number(min)?..=number(max)?);
                tail
            }
            ["--sort", key, tail @ ..] => {
                query.sort = match *key {
                    "id" => SortKey::Id,
                    "duration" => SortKey::Duration,
                    "ram" => SortKey::Ram,
                    "function" => SortKey::Function,
                    other => return Err(format!("unknown sort key '{other}'")),
                };
                tail
            }
            ["--desc", tail @ ..] => {
                query.order = SortOrder::Descending;
                tail
            }
            ["--offset", n, tail @ ..] => {
                query.offset = number(n)?;
                tail
            }
            ["--limit", n, tail @ ..] => {
                query.limit = Some(number(n)?);
                tail
            }
            [other, ..] => return Err(format!("unknown query argument '{other}'")),
        };
    }
}

fn number<T: std::str::FromStr>(value: &str) -> Result<T, String> {
    value
        .parse()
        .map_err(|_| format!("'{value}' is not a valid number"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracedb::db::TraceFilter;

    fn parse(line: &str) -> Result<Command, String> {
        let args: Vec<String> = line.split_whitespace().map(str::to_string).collect();
        parse_command(&args)
    }

    #[test]
    fn test_parse_log() {
        assert_eq!(
            parse("log 3 render 45").expect("parse"),
            Command::Log(NewTrace::new(3, "render", 45))
        );
        assert_eq!(
            parse("log 3 render 45 2048 cold").expect("parse"),
            Command::Log(NewTrace::new(3, "render", 45).ram_bytes(2048).message("cold"))
        );
        assert!(parse("log 3 render fast").is_err());
    }

    #[test]
    fn test_parse_queries() {
        assert_eq!(parse("list").expect("parse"), Command::List(None));
        assert_eq!(parse("list 4").expect("parse"), Command::List(Some(4)));
        assert_eq!(parse("range 10 20").expect("parse"), Command::Range(10, 20));
        assert_eq!(
            parse("query 1 ram 100 200").expect("parse"),
            Command::Query(1, TraceQuery::default().filter(TraceFilter::default().ram(100..=200)))
        );
        assert_eq!(parse("query 1").expect("parse"), Command::Query(1, TraceQuery::default()));
        assert!(parse("query 1 cpu 0 1").is_err());
        assert!(parse("query 1 ram 100").is_err());
    }

    #[test]
    fn test_parse_sorted_query() {
        assert_eq!(
            parse("query 2 duration 10 500 --sort ram --desc --offset 5 --limit 20").expect("parse"),
            Command::Query(
                2,
                TraceQuery::default()
                    .filter(TraceFilter::default().duration(10..=500))
                    .sort_by(SortKey::Ram, SortOrder::Descending)
                    .offset(5)
                    .limit(20)
            )
        );
        assert_eq!(
            parse("query 2 --sort function").expect("parse"),
            Command::Query(2, TraceQuery::default().sort_by(SortKey::Function, SortOrder::Ascending))
        );
        assert!(parse("query 2 --sort cpu").is_err());
        assert!(parse("query 2 --limit").is_err());
        assert!(parse("query 2 --offset -1").is_err());
    }

    #[test]
    fn test_parse_stats() {
        assert_eq!(parse("stats 3").expect("parse"), Command::Stats(3, GroupBy::Function));
        assert_eq!(parse("stats 3 version").expect("parse"), Command::Stats(3, GroupBy::AppVersion));
        assert!(parse("stats 3 owner").is_err());
    }

    #[test]
    fn test_parse_project_commands() {
        assert_eq!(
            parse("project create 9 checkout").expect("parse"),
            Command::ProjectCreate {
                owner_id: 9,
                name: "checkout".to_string()
            }
        );
        assert_eq!(
            parse("project thresholds 2 50 300").expect("parse"),
            Command::ProjectThresholds {
                project_id: 2,
                fast_ms: 50,
                normal_ms: 300
            }
        );
        assert_eq!(
            parse("project rename 2 payments").expect("parse"),
            Command::ProjectRename {
                project_id: 2,
                name: "payments".to_string()
            }
        );
        assert_eq!(parse("project delete 2").expect("parse"), Command::ProjectDelete(2));
    }

    #[test]
    fn test_parse_errors() {
        assert_eq!(parse(""), Err("missing command".to_string()));
        assert!(parse("get").is_err());
        assert!(parse("get -1").is_err());
        assert!(parse("frobnicate").is_err());
    }
}
