use std::path::PathBuf;

use clap::{
    Arg, ArgAction, Command,
    builder::{Styles, styling},
};

/// Everything the supervisor and the reporter need to know about one invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchRequest {
    pub verbose: bool,
    /// Where to write the report, stdout when `None`
    pub output_path: Option<PathBuf>,
    /// The program and its arguments, space-joined verbatim
    pub command_line: String,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum UsageError {
    #[error("Help requested")]
    HelpRequested,
    #[error("Unknown option {0}")]
    UnknownOption(String),
    #[error("Missing positional argument")]
    MissingPositionalArgument,
    #[error("Missing program name")]
    MissingProgramName,
}

const OUTPUT_FLAGS: [&str; 2] = ["--output", "-o"];

/// Split the raw arguments (without the invocation name) into options and the command line to
/// run.
///
/// Options are only recognized before the first non-option token or before `--`. From there on,
/// every token is part of the command line, even the ones starting with a dash.
///
/// Arguments are joined with a single space and are never re-quoted: an argument containing
/// spaces has to be quoted by the caller.
pub fn parse_args<I, S>(args: I) -> Result<LaunchRequest, UsageError>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let mut tokens = args.into_iter().map(Into::into);
    let mut verbose = false;
    let mut output: Option<String> = None;
    let mut unknown_option: Option<String> = None;
    let mut command: Vec<String> = Vec::new();

    while let Some(token) = tokens.next() {
        if token == "--" {
            break;
        }

        if let Some(attached) = OUTPUT_FLAGS
            .iter()
            .find_map(|flag| token.strip_prefix(flag))
        {
            if attached.is_empty() {
                // The value is the next token, whatever it looks like
                if let Some(value) = tokens.next() {
                    output = Some(value);
                }
            } else {
                output = Some(attached.to_string());
            }
            continue;
        }

        match token.as_str() {
            "-v" | "--verbose" => verbose = true,
            "-h" | "--help" => return Err(UsageError::HelpRequested),
            option if option.starts_with('-') => {
                unknown_option.get_or_insert_with(|| option.to_string());
            }
            _ => {
                command.push(token);
                break;
            }
        }
    }
    command.extend(tokens);

    if output.as_deref() == Some("--") {
        return Err(UsageError::MissingPositionalArgument);
    }
    if command.is_empty() {
        return Err(UsageError::MissingProgramName);
    }
    if let Some(option) = unknown_option {
        return Err(UsageError::UnknownOption(option));
    }

    Ok(LaunchRequest {
        verbose,
        output_path: output.filter(|path| !path.is_empty()).map(PathBuf::from),
        command_line: command.join(" "),
    })
}

fn create_styles() -> Styles {
    styling::Styles::styled()
        .header(styling::AnsiColor::Green.on_default() | styling::Effects::BOLD)
        .usage(styling::AnsiColor::Green.on_default() | styling::Effects::BOLD)
        .literal(styling::AnsiColor::Yellow.on_default() | styling::Effects::BOLD)
        .placeholder(styling::AnsiColor::Cyan.on_default())
}

/// Describe the command line surface for help rendering.
///
/// Parsing itself is done by [`parse_args`]: the `-o<file>` and `--output<file>` forms and the
/// "everything after the program name belongs to the program" rule are not expressible as clap
/// arguments.
pub fn usage_command() -> Command {
    Command::new("chronos")
        .about("Report wallclock, user and system times of a process and all of its children")
        .override_usage("chronos [-v|--verbose] [-o <FILE>|--output <FILE>] [--] <PROGRAM> [OPTIONS]...")
        .styles(create_styles())
        .disable_version_flag(true)
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .action(ArgAction::SetTrue)
                .help("Produce results in verbose format"),
        )
        .arg(
            Arg::new("output")
                .short('o')
                .long("output")
                .value_name("FILE")
                .help("Write results to FILE instead of stdout"),
        )
        .arg(
            Arg::new("program")
                .value_name("PROGRAM")
                .required(true)
                .help("Program name to start"),
        )
        .arg(
            Arg::new("options")
                .value_name("OPTIONS")
                .num_args(0..)
                .trailing_var_arg(true)
                .allow_hyphen_values(true)
                .help("The program's own arguments"),
        )
}

/// Render the usage text, with colors when `styled` is set.
pub fn render_usage(styled: bool) -> String {
    let help = usage_command().render_help();
    if styled {
        help.ansi().to_string()
    } else {
        help.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn parse(args: &[&str]) -> Result<LaunchRequest, UsageError> {
        parse_args(args.iter().copied())
    }

    #[test]
    fn test_program_only() {
        let request = parse(&["myapp"]).unwrap();
        assert_eq!(
            request,
            LaunchRequest {
                verbose: false,
                output_path: None,
                command_line: "myapp".to_string(),
            }
        );
    }

    #[test]
    fn test_program_arguments_are_kept_verbatim() {
        let request = parse(&["-v", "make", "-j", "8", "--keep-going", "-v", "all"]).unwrap();
        assert!(request.verbose);
        assert_eq!(request.command_line, "make -j 8 --keep-going -v all");
    }

    #[rstest]
    #[case(&["-oresult.txt", "prog"])]
    #[case(&["-o", "result.txt", "prog"])]
    #[case(&["--outputresult.txt", "prog"])]
    #[case(&["--output", "result.txt", "prog"])]
    fn test_output_flag_forms(#[case] args: &[&str]) {
        let request = parse(args).unwrap();
        assert_eq!(request.output_path, Some(PathBuf::from("result.txt")));
        assert_eq!(request.command_line, "prog");
    }

    #[test]
    fn test_last_output_wins() {
        let request = parse(&["-o", "first.txt", "--output", "second.txt", "prog"]).unwrap();
        assert_eq!(request.output_path, Some(PathBuf::from("second.txt")));
    }

    #[test]
    fn test_output_value_may_look_like_a_flag() {
        let request = parse(&["-o", "-v", "prog"]).unwrap();
        assert_eq!(request.output_path, Some(PathBuf::from("-v")));
        assert!(!request.verbose);
    }

    #[test]
    fn test_empty_output_means_stdout() {
        let request = parse(&["-o", "", "prog"]).unwrap();
        assert_eq!(request.output_path, None);
    }

    #[test]
    fn test_separator_starts_command_line() {
        let request = parse(&["-v", "--", "-weird-name", "--flag", "--"]).unwrap();
        assert!(request.verbose);
        assert_eq!(request.command_line, "-weird-name --flag --");
    }

    #[test]
    fn test_options_after_program_belong_to_program() {
        let request = parse(&["prog", "-o", "file", "--help"]).unwrap();
        assert_eq!(request.output_path, None);
        assert_eq!(request.command_line, "prog -o file --help");
    }

    #[rstest]
    #[case(&["-o", "--", "prog"])]
    #[case(&["-o--", "prog"])]
    #[case(&["--output", "--"])]
    fn test_separator_as_output_value(#[case] args: &[&str]) {
        assert_eq!(parse(args), Err(UsageError::MissingPositionalArgument));
    }

    #[rstest]
    #[case(&[])]
    #[case(&["-v"])]
    #[case(&["--"])]
    #[case(&["-o", "file"])]
    #[case(&["-v", "-o"])]
    #[case(&["-x"])]
    #[case(&["--frobnicate", "-q", "-Z"])]
    fn test_missing_program_name(#[case] args: &[&str]) {
        assert_eq!(parse(args), Err(UsageError::MissingProgramName));
    }

    #[rstest]
    #[case(&["-h", "prog"])]
    #[case(&["--help"])]
    #[case(&["-v", "--help", "-x", "prog"])]
    fn test_help_requested(#[case] args: &[&str]) {
        assert_eq!(parse(args), Err(UsageError::HelpRequested));
    }

    #[test]
    fn test_unknown_option_before_program() {
        assert_eq!(
            parse(&["-x", "-y", "prog"]),
            Err(UsageError::UnknownOption("-x".to_string()))
        );
        assert_eq!(
            parse(&["-vo", "file", "prog"]),
            Err(UsageError::UnknownOption("-vo".to_string()))
        );
    }

    #[test]
    fn test_usage_command_is_consistent() {
        usage_command().debug_assert();
    }

    #[test]
    fn test_render_usage_mentions_options() {
        let usage = render_usage(false);
        assert!(usage.contains("--verbose"));
        assert!(usage.contains("--output <FILE>"));
        assert!(usage.contains("chronos [-v|--verbose]"));
        assert!(!usage.contains('\u{1b}'));
    }
}
