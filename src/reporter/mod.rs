mod sink;

pub use sink::ReportSink;

use std::io::{self, Write};

use crate::cli::LaunchRequest;
use crate::supervisor::ResourceReport;

/// Seconds are always printed in fixed-point notation with two decimals
fn format_seconds(seconds: f64) -> String {
    format!("{seconds:.2}")
}

/// Render the report, terse like POSIX `time` or verbose with labeled lines.
pub fn format_report(report: &ResourceReport, request: &LaunchRequest) -> String {
    let wall_clock = format_seconds(report.wall_clock_seconds);
    let user = format_seconds(report.user_seconds);
    let kernel = format_seconds(report.kernel_seconds);

    if request.verbose {
        format!(
            "Command being timed: \"{command_line}\"\n\
             Elapsed (wall clock) time (seconds): {wall_clock}\n\
             User time (seconds): {user}\n\
             System time (seconds): {kernel}\n\
             Page faults: {page_faults}\n\
             Exit status: {exit_code}\n",
            command_line = request.command_line,
            page_faults = report.page_faults,
            exit_code = report.exit_code,
        )
    } else {
        format!("real\t{wall_clock}s\nuser\t{user}s\nsys\t{kernel}s\n")
    }
}

pub fn write_report(
    out: &mut impl Write,
    report: &ResourceReport,
    request: &LaunchRequest,
) -> io::Result<()> {
    out.write_all(format_report(report, request).as_bytes())
}
