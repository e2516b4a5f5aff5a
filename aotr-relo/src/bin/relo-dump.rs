use std::io;

use relo::{RelocationTarget, disassemble_group, host_target, logging, target_by_name};

#[derive(Debug, Clone, PartialEq, Eq, Default)]
struct CliConfig {
    group_path: Option<String>,
    target: Option<String>,
    use_svm: bool,
    list_kinds: bool,
    help: bool,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    logging::init()?;
    let args: Vec<String> = std::env::args().skip(1).collect();
    let cli = parse_cli_args(&args).map_err(io::Error::other)?;
    if cli.help {
        print_usage();
        return Ok(());
    }
    if cli.list_kinds {
        print_kinds();
        return Ok(());
    }

    let target = resolve_target(cli.target.as_deref())?;
    let Some(path) = cli.group_path.as_ref() else {
        print_usage();
        return Err(io::Error::other("missing relocation group path").into());
    };
    let bytes = std::fs::read(path)?;
    match disassemble_group(&bytes, target.as_ref(), cli.use_svm) {
        Ok(listing) => {
            print!("{listing}");
            Ok(())
        }
        Err(err) => {
            tracing::error!("{path}: {err}");
            Err(err.into())
        }
    }
}

fn resolve_target(name: Option<&str>) -> Result<Box<dyn RelocationTarget>, io::Error> {
    match name {
        Some(name) => {
            target_by_name(name).ok_or_else(|| io::Error::other(format!("unknown target '{name}'")))
        }
        None => host_target()
            .ok_or_else(|| io::Error::other("no relocation target for this host, pass --target")),
    }
}

fn parse_cli_args(args: &[String]) -> Result<CliConfig, String> {
    let mut cfg = CliConfig::default();
    let mut index = 0usize;
    while index < args.len() {
        match args[index].as_str() {
            "-h" | "--help" => {
                cfg.help = true;
                index += 1;
            }
            "--svm" => {
                cfg.use_svm = true;
                index += 1;
            }
            "--kinds" => {
                cfg.list_kinds = true;
                index += 1;
            }
            "--target" => {
                let name = args
                    .get(index + 1)
                    .ok_or_else(|| "missing value for --target".to_string())?;
                if target_by_name(name).is_none() {
                    return Err(format!("unknown target '{name}'"));
                }
                cfg.target = Some(name.clone());
                index += 2;
            }
            other if other.starts_with('-') => {
                return Err(format!("unknown option '{other}'"));
            }
            path => {
                if cfg.group_path.is_some() {
                    return Err(format!("unexpected argument '{path}'"));
                }
                cfg.group_path = Some(path.to_string());
                index += 1;
            }
        }
    }
    Ok(cfg)
}

fn print_kinds() {
    for kind in relo::abi::KINDS.iter() {
        let state = if kind.is_supported() { "" } else { " (reserved)" };
        println!("{:3} {}{}", kind.tag, kind.name, state);
    }
}

fn print_usage() {
    println!("Usage:");
    println!("  relo-dump [--target x86_64|aarch64|ppc32] [--svm] <group.bin>");
    println!("  relo-dump --kinds");
}

#[cfg(test)]
mod tests {
    use super::parse_cli_args;

    fn s(value: &str) -> String {
        value.to_string()
    }

    #[test]
    fn parse_cli_defaults() {
        let cfg = parse_cli_args(&[s("group.bin")]).expect("parse should succeed");
        assert_eq!(cfg.group_path.as_deref(), Some("group.bin"));
        assert!(cfg.target.is_none());
        assert!(!cfg.use_svm);
        assert!(!cfg.help);
    }

    #[test]
    fn parse_cli_target_and_svm() {
        let cfg = parse_cli_args(&[s("--target"), s("ppc32"), s("--svm"), s("g.bin")])
            .expect("parse should succeed");
        assert_eq!(cfg.target.as_deref(), Some("ppc32"));
        assert!(cfg.use_svm);
    }

    #[test]
    fn parse_cli_rejects_bad_input() {
        assert!(parse_cli_args(&[s("--target")]).is_err());
        assert!(parse_cli_args(&[s("--target"), s("mips")]).is_err());
        assert!(parse_cli_args(&[s("--bogus")]).is_err());
        assert!(parse_cli_args(&[s("a.bin"), s("b.bin")]).is_err());
    }
}
