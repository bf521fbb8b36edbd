//! Prometheus text exposition format.
//!
//! Renders per-deployment load reports into the Prometheus text exposition
//! format for scraping by a Prometheus server or compatible agent.

use std::fmt::Write;

use steward_state::DeploymentId;

/// Point-in-time view of one deployment for exposition.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadReport {
    pub deployment: DeploymentId,
    pub average_in_flight: Option<f64>,
    pub reporting_replicas: usize,
    pub target_replicas: u32,
}

/// Render load reports and the long-poll waiter count into Prometheus text
/// format. Deployments without data omit the average gauge.
pub fn render_prometheus(reports: &[LoadReport], long_poll_waiters: usize) -> String {
    let mut out = String::new();

    out.push_str(
        "# HELP steward_average_in_flight_requests Average in-flight requests per reporting replica.\n",
    );
    out.push_str("# TYPE steward_average_in_flight_requests gauge\n");
    for r in reports {
        if let Some(avg) = r.average_in_flight {
            let _ = writeln!(
                out,
                "steward_average_in_flight_requests{{deployment=\"{}\"}} {avg:.2}",
                r.deployment
            );
        }
    }

    out.push_str("# HELP steward_reporting_replicas Replicas with a sample in the look-back window.\n");
    out.push_str("# TYPE steward_reporting_replicas gauge\n");
    for r in reports {
        let _ = writeln!(
            out,
            "steward_reporting_replicas{{deployment=\"{}\"}} {}",
            r.deployment, r.reporting_replicas
        );
    }

    out.push_str("# HELP steward_target_replicas Desired replica count.\n");
    out.push_str("# TYPE steward_target_replicas gauge\n");
    for r in reports {
        let _ = writeln!(
            out,
            "steward_target_replicas{{deployment=\"{}\"}} {}",
            r.deployment, r.target_replicas
        );
    }

    out.push_str("# HELP steward_long_poll_waiters Long-poll requests currently suspended.\n");
    out.push_str("# TYPE steward_long_poll_waiters gauge\n");
    let _ = writeln!(out, "steward_long_poll_waiters {long_poll_waiters}");

    out
}
