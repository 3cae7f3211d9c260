use anyhow::{Result, anyhow};
use std::env;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Run the HTTP server.
    Serve { bind: Option<String> },
    /// Run one report through the pipeline and print the outcome.
    Submit {
        email: String,
        problem: String,
        json_output: bool,
    },
    /// Report which secrets the named systems are missing.
    Check { systems: Vec<String> },
}

impl Command {
    pub fn parse() -> Result<Self> {
        Self::parse_argv(env::args())
    }

    /// Parse a full argv, program name first. An empty argv means `serve`.
    fn parse_argv(argv: impl IntoIterator<Item = String>) -> Result<Self> {
        let args: Vec<String> = argv.into_iter().skip(1).collect();
        Self::parse_from(&args)
    }

    pub fn parse_from(args: &[String]) -> Result<Self> {
        let Some((first, rest)) = args.split_first() else {
            return Ok(Command::Serve { bind: None });
        };

        match first.as_str() {
            "serve" => parse_serve(rest),
            "submit" => parse_submit(rest),
            "check" => Ok(Command::Check {
                systems: rest.to_vec(),
            }),
            // Bare flags mean `serve`.
            flag if flag.starts_with('-') => parse_serve(args),
            unknown => Err(anyhow!("Unknown command: {unknown}")),
        }
    }
}

fn value<'a>(args: &'a [String], i: usize, flag: &str) -> Result<&'a String> {
    args.get(i).ok_or_else(|| anyhow!("{flag} requires a value"))
}

fn parse_serve(args: &[String]) -> Result<Command> {
    let mut bind = None;
    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "-b" | "--bind" => {
                i += 1;
                bind = Some(value(args, i, "--bind")?.clone());
            }
            unknown => return Err(anyhow!("Unknown argument: {unknown}")),
        }
        i += 1;
    }
    Ok(Command::Serve { bind })
}

fn parse_submit(args: &[String]) -> Result<Command> {
    let mut email = None;
    let mut problem = None;
    let mut json_output = false;

    let mut i = 0;
    while i < args.len() {
        let arg = &args[i];
        match arg.as_str() {
            "-e" | "--email" => {
                i += 1;
                email = Some(value(args, i, arg)?.clone());
            }
            "-p" | "--problem" => {
                i += 1;
                problem = Some(value(args, i, arg)?.clone());
            }
            "--json" => json_output = true,
            unknown => return Err(anyhow!("Unknown argument: {unknown}")),
        }
        i += 1;
    }

    Ok(Command::Submit {
        email: email.ok_or_else(|| anyhow!("submit requires --email"))?,
        problem: problem.ok_or_else(|| anyhow!("submit requires --problem"))?,
        json_output,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(strs: &[&str]) -> Vec<String> {
        strs.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn no_args_serves_on_default_bind() {
        assert_eq!(
            Command::parse_from(&args(&[])).unwrap(),
            Command::Serve { bind: None }
        );
    }

    #[test]
    fn empty_argv_serves_instead_of_panicking() {
        assert_eq!(
            Command::parse_argv(Vec::new()).unwrap(),
            Command::Serve { bind: None }
        );
        assert_eq!(
            Command::parse_argv(args(&["relayrs", "check", "github"])).unwrap(),
            Command::Check {
                systems: vec!["github".to_string()]
            }
        );
    }

    #[test]
    fn serve_with_bind() {
        let parsed = Command::parse_from(&args(&["serve", "--bind", "0.0.0.0:8080"])).unwrap();
        assert_eq!(
            parsed,
            Command::Serve {
                bind: Some("0.0.0.0:8080".to_string())
            }
        );
    }

    #[test]
    fn bare_bind_flag_implies_serve() {
        let parsed = Command::parse_from(&args(&["-b", "127.0.0.1:9000"])).unwrap();
        assert!(matches!(parsed, Command::Serve { bind: Some(_) }));
    }

    #[test]
    fn submit_parses_all_flags() {
        let parsed = Command::parse_from(&args(&[
            "submit",
            "-e",
            "jane@example.com",
            "--problem",
            "cart is empty",
            "--json",
        ]))
        .unwrap();
        assert_eq!(
            parsed,
            Command::Submit {
                email: "jane@example.com".to_string(),
                problem: "cart is empty".to_string(),
                json_output: true,
            }
        );
    }

    #[test]
    fn submit_requires_both_fields() {
        let err = Command::parse_from(&args(&["submit", "--email", "a@b.c"])).unwrap_err();
        assert!(err.to_string().contains("--problem"));
    }

    #[test]
    fn missing_value_is_an_error() {
        let err = Command::parse_from(&args(&["submit", "--email"])).unwrap_err();
        assert!(err.to_string().contains("requires a value"));
        assert!(Command::parse_from(&args(&["serve", "--bind"])).is_err());
    }

    #[test]
    fn check_collects_system_names() {
        let parsed = Command::parse_from(&args(&["check", "supabase", "github"])).unwrap();
        assert_eq!(
            parsed,
            Command::Check {
                systems: vec!["supabase".to_string(), "github".to_string()]
            }
        );
    }

    #[test]
    fn unknown_command_and_argument() {
        assert!(
            Command::parse_from(&args(&["deploy"]))
                .unwrap_err()
                .to_string()
                .contains("Unknown command")
        );
        assert!(
            Command::parse_from(&args(&["submit", "--fast"]))
                .unwrap_err()
                .to_string()
                .contains("Unknown argument")
        );
    }
}
