use std::io::{IsTerminal, Write};

use crate::{
    cli::{self, LaunchRequest, UsageError},
    prelude::*,
    reporter::{self, ReportSink},
    supervisor::{ProcessBackend, ResourceReport, Supervisor, surviving_processes_warning},
};

/// Exit code when the program could not be launched or measured
pub const SUPERVISOR_FAILURE_EXIT_CODE: i32 = 127;
pub const USAGE_EXIT_CODE: i32 = 1;
pub const REPORT_FAILURE_EXIT_CODE: i32 = 1;

/// Run the tool with the process arguments and return the exit code to use.
#[cfg(target_os = "linux")]
pub fn run() -> i32 {
    let mut stderr = std::io::stderr();
    let styled_usage = stderr.is_terminal();
    run_with_backend(
        std::env::args().skip(1),
        crate::supervisor::linux::LinuxBackend::new(),
        &mut Diagnostics::new(&mut stderr, styled_usage),
    )
}

#[cfg(not(target_os = "linux"))]
pub fn run() -> i32 {
    eprintln!("Error: No process tracking backend is available for this platform");
    SUPERVISOR_FAILURE_EXIT_CODE
}

/// User facing messages: errors, warnings and the usage text.
///
/// These are always printed, whatever the log level.
pub struct Diagnostics<'a> {
    out: &'a mut dyn Write,
    styled_usage: bool,
}

impl<'a> Diagnostics<'a> {
    pub fn new(out: &'a mut dyn Write, styled_usage: bool) -> Self {
        Self { out, styled_usage }
    }

    fn error(&mut self, message: impl std::fmt::Display) {
        self.emit(format_args!("Error: {message}\n"));
    }

    fn warning(&mut self, message: impl std::fmt::Display) {
        self.emit(format_args!("Warning: {message}\n"));
    }

    fn usage(&mut self) {
        let usage = cli::render_usage(self.styled_usage);
        self.emit(format_args!("{usage}"));
    }

    fn emit(&mut self, message: std::fmt::Arguments) {
        // Nowhere left to report a broken stderr
        if let Err(err) = self.out.write_fmt(message) {
            debug!("Failed to write to stderr: {err}");
        }
    }
}

/// Parse `args`, measure the requested program with `backend` and write the report.
///
/// On success the exit code is the one of the measured program.
pub fn run_with_backend<B, I>(args: I, backend: B, diagnostics: &mut Diagnostics<'_>) -> i32
where
    B: ProcessBackend,
    I: IntoIterator<Item = String>,
{
    let request = match cli::parse_args(args) {
        Ok(request) => request,
        Err(err) => {
            if err != UsageError::HelpRequested {
                diagnostics.error(&err);
            }
            diagnostics.usage();
            return USAGE_EXIT_CODE;
        }
    };
    debug!("Launch request: {request:?}");

    let report = match Supervisor::new(backend).run_and_measure(&request.command_line) {
        Ok(report) => report,
        Err(err) => {
            diagnostics.error(&err);
            return SUPERVISOR_FAILURE_EXIT_CODE;
        }
    };

    if let Some(warning) = surviving_processes_warning(&report) {
        diagnostics.warning(warning);
    }

    if let Err(err) = emit_report(&request, &report) {
        diagnostics.error(format_args!("{err:#}"));
        return REPORT_FAILURE_EXIT_CODE;
    }

    report.exit_code
}

fn emit_report(request: &LaunchRequest, report: &ResourceReport) -> Result<()> {
    let destination = match &request.output_path {
        Some(path) => path.display().to_string(),
        None => "stdout".to_string(),
    };

    let mut sink = ReportSink::open(request.output_path.as_deref())
        .with_context(|| format!("Failed to open {destination}"))?;
    reporter::write_report(&mut sink, report, request)
        .with_context(|| format!("Failed to write the report to {destination}"))?;
    sink.finish()
        .with_context(|| format!("Failed to write the report to {destination}"))?;

    Ok(())
}
