//! Text rendering of derived metrics.
//!
//! The layout is fixed: a header, then one section per measured group in
//! GPU, energy, performance order, then a closing border. Groups that were
//! not measured have no section; when none were measured a single
//! "No measurements available" line takes their place.

use crate::catalog::{GroupKind, Unit};
use crate::delta::{CounterDelta, DerivedMetrics};

const WIDTH: usize = 80;
const TITLE: &str = "HARDWARE TELEMETRY RESULTS";

const BYTES_PER_GIB: f64 = (1u64 << 30) as f64;

/// Optional header lines describing where and when the run happened
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReportContext {
    pub host: Option<String>,
    pub os: Option<String>,
    pub cpu: Option<String>,
    pub memory_bytes: Option<u64>,
    pub started: Option<String>,
}

struct Report {
    text: String,
}

impl Report {
    fn new() -> Self {
        Self {
            text: String::new(),
        }
    }

    fn line(&mut self, line: impl AsRef<str>) {
        self.text.push_str(line.as_ref());
        self.text.push('\n');
    }

    fn border(&mut self) {
        self.line("=".repeat(WIDTH));
    }

    fn rule(&mut self) {
        self.line("-".repeat(WIDTH));
    }

    fn centered(&mut self, title: &str) {
        let pad = WIDTH.saturating_sub(title.len()) / 2;
        self.line(format!("{}{}", " ".repeat(pad), title));
    }
}

/// Renders the report without header context
pub fn render(derived: &DerivedMetrics) -> String {
    render_with_context(derived, &ReportContext::default())
}

/// Renders the report, including host and start time when given
pub fn render_with_context(derived: &DerivedMetrics, context: &ReportContext) -> String {
    let mut report = Report::new();

    report.border();
    report.centered(TITLE);
    report.border();
    if let Some(host) = &context.host {
        report.line(format!("Host: {host}"));
    }
    if let Some(os) = &context.os {
        report.line(format!("OS: {os}"));
    }
    if let Some(cpu) = &context.cpu {
        report.line(format!("CPU: {cpu}"));
    }
    if let Some(bytes) = context.memory_bytes {
        report.line(format!("RAM: {:.1} GiB", bytes as f64 / BYTES_PER_GIB));
    }
    if let Some(started) = &context.started {
        report.line(format!("Started: {started}"));
    }
    report.line(format!("Runtime: {:.3} seconds", derived.elapsed_seconds()));

    if let Some(gpu) = derived.group(GroupKind::Gpu) {
        report.rule();
        report.line("GPU MEASUREMENTS:");
        for counter in &gpu.counters {
            report.line(gpu_line(counter));
        }
    }

    if let Some(energy_group) = derived.group(GroupKind::CpuEnergy) {
        let energy = &derived.energy;
        report.rule();
        report.line("ENERGY MEASUREMENTS:");
        for counter in &energy_group.counters {
            let name = format!("{}:", counter.id.label());
            report.line(format!(
                "{:<15} {} nJ ({:.3} J)",
                name,
                counter.raw_delta,
                counter.value()
            ));
        }
        if let Some(total) = energy.total_joules {
            report.line(format!("{:<15} {:.3} J", "Total Energy:", total));
        }
        if let Some(watts) = energy.package_watts {
            report.line(format!("Average Package Power: {watts:.3} W"));
        }
        if let Some(watts) = energy.dram_watts {
            report.line(format!("Average DRAM Power:    {watts:.3} W"));
        }
        if let Some(watts) = energy.total_watts {
            report.line(format!("Average Total Power:   {watts:.3} W"));
        }
    }

    if let Some(perf_group) = derived.group(GroupKind::CpuPerf) {
        let perf = &derived.perf;
        report.rule();
        report.line("PERFORMANCE COUNTERS:");
        for counter in &perf_group.counters {
            let name = format!("{}:", counter.id.label());
            report.line(format!("{:<19} {}", name, counter.raw_delta));
        }
        if let Some(ghz) = perf.frequency_ghz {
            report.line(format!("{:<19} {:.3} GHz", "Frequency:", ghz));
        }
        if let Some(mips) = perf.mips {
            report.line(format!("{:<19} {:.3} MIPS", "IPS:", mips));
        }
        if let Some(ipc) = perf.instructions_per_cycle {
            report.line(format!("{:<19} {:.3} instructions/cycle", "IPC:", ipc));
        }
    }

    if derived.is_empty() {
        report.line("No measurements available");
    }

    report.border();
    report.text
}

fn gpu_line(counter: &CounterDelta) -> String {
    let label = counter.id.label();
    let unit = counter.unit();
    let whole = unit.whole(counter.raw_delta);
    match unit {
        Unit::Percent => format!("{label}: {whole}%"),
        Unit::Microwatts => format!("{label}: {whole} watts"),
        Unit::Millidegrees => format!("{label}: {whole}°C"),
        Unit::Nanojoules => format!("{label}: {:.3} J", counter.value()),
        Unit::Count => format!("{label}: {}", counter.raw_delta),
    }
}
