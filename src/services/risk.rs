//! Risk Model (C4): a pure, deterministic function from `(deadline, eta,
//! severity)` to a risk classification. No I/O — every function here is a
//! plain transformation, mirroring the teacher's `compute_extraction_times`
//! / `floor_to_hour` style in its poller service.

use chrono::{DateTime, Duration, Utc};

/// Risk status, one of three fixed glyphs. Stored and round-tripped
/// verbatim as UTF-8 — never remapped to an English name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Green,
    Yellow,
    Red,
}

impl Status {
    pub fn glyph(self) -> &'static str {
        match self {
            Status::Green => "🟢",
            Status::Yellow => "🟡",
            Status::Red => "🔴",
        }
    }

    pub fn suggestion(self) -> &'static str {
        match self {
            Status::Green => "Manter rota. Recalcular mais perto do prazo.",
            Status::Yellow => {
                "Considere antecipar saída e avisar cliente sobre possível variação."
            }
            Status::Red => "ALTO risco: antecipar/alternar rota e ALERTAR cliente agora.",
        }
    }

    /// Reconstruct a status from its stored glyph, for scheduling a retry
    /// after a stage that never reached the risk model.
    pub fn from_glyph(s: &str) -> Option<Self> {
        match s {
            "🟢" => Some(Status::Green),
            "🟡" => Some(Status::Yellow),
            "🔴" => Some(Status::Red),
            _ => None,
        }
    }
}

/// Recalculation cadence, controls how aggressively a trip is re-evaluated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyMode {
    Conservative,
    Balanced,
    Aggressive,
}

impl PolicyMode {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "conservative" => Some(PolicyMode::Conservative),
            "balanced" => Some(PolicyMode::Balanced),
            "aggressive" => Some(PolicyMode::Aggressive),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PolicyMode::Conservative => "conservative",
            PolicyMode::Balanced => "balanced",
            PolicyMode::Aggressive => "aggressive",
        }
    }
}

/// The full output of a single risk evaluation.
#[derive(Debug, Clone, PartialEq)]
pub struct RiskAssessment {
    pub risk_pct: i32,
    pub status: Status,
    pub buffer_minutes: i64,
    pub why: String,
    pub suggestion: &'static str,
}

/// Base risk by slack band (spec §4.4 step 2). Bands are strictly
/// "this value or higher up to but not including the next", resolving the
/// boundary ambiguity the spec flags as an open question: `slack_s >= 0`
/// lands in the 0.40 band whenever it is below 7200, never double-counted
/// against the 4h/2h bands above it.
fn base_risk(slack_s: i64) -> f64 {
    if slack_s >= 14_400 {
        0.10
    } else if slack_s >= 7_200 {
        0.20
    } else if slack_s >= 0 {
        0.40
    } else if slack_s >= -7_200 {
        0.70
    } else {
        0.85
    }
}

fn status_from_pct(pct: i32) -> Status {
    if pct < 34 {
        Status::Green
    } else if pct < 67 {
        Status::Yellow
    } else {
        Status::Red
    }
}

/// Evaluate risk from a deadline, an ETA, and a weather severity in [0, 1].
pub fn assess(deadline: DateTime<Utc>, eta: DateTime<Utc>, severity: f64) -> RiskAssessment {
    let slack_s = (deadline - eta).num_seconds();
    let base = base_risk(slack_s);
    let risk = (base + 0.25 * severity).clamp(0.0, 0.99);
    let risk_pct = (risk * 100.0).round() as i32;
    let status = status_from_pct(risk_pct);
    let buffer_minutes = (slack_s as f64 / 60.0).round() as i64;
    let why = format!("buffer={buffer_minutes}min, weather_sev={severity:.2}");

    RiskAssessment {
        risk_pct,
        status,
        buffer_minutes,
        why,
        suggestion: status.suggestion(),
    }
}

/// Recommended departure time given the current status and remaining buffer.
pub fn recommend_depart(now: DateTime<Utc>, status: Status, buffer_minutes: i64) -> DateTime<Utc> {
    match status {
        Status::Green => now,
        Status::Yellow => {
            if buffer_minutes < 120 {
                now - Duration::minutes(30)
            } else {
                now - Duration::minutes(15)
            }
        }
        Status::Red => {
            if buffer_minutes < 60 {
                now - Duration::minutes(60)
            } else {
                now - Duration::minutes(30)
            }
        }
    }
}

/// Adaptive next-evaluation interval in seconds (spec §4.4 table). A
/// budget-limited recalculation always backs off to 2700 s regardless of
/// policy mode or status.
pub fn next_interval_seconds(policy_mode: PolicyMode, status: Status, budget_limited: bool) -> i64 {
    if budget_limited {
        return 2700;
    }
    match (policy_mode, status) {
        (PolicyMode::Conservative, Status::Green) => 3600,
        (PolicyMode::Conservative, Status::Yellow) => 1500,
        (PolicyMode::Conservative, Status::Red) => 480,
        (PolicyMode::Balanced, Status::Green) => 2400,
        (PolicyMode::Balanced, Status::Yellow) => 900,
        (PolicyMode::Balanced, Status::Red) => 300,
        (PolicyMode::Aggressive, Status::Green) => 1200,
        (PolicyMode::Aggressive, Status::Yellow) => 480,
        (PolicyMode::Aggressive, Status::Red) => 120,
    }
}

/// Render the customer-facing message template (spec §6).
pub fn customer_message(
    status: Status,
    eta: DateTime<Utc>,
    deadline: DateTime<Utc>,
    why: &str,
    suggestion: &str,
) -> String {
    format!(
        "Atualização: status {}. ETA {} (deadline {}). Motivo: {}. Ação: {}",
        status.glyph(),
        eta.format("%Y-%m-%d %H:%M UTC"),
        deadline.format("%Y-%m-%d %H:%M UTC"),
        why,
        suggestion,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(offset_s: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap() + Duration::seconds(offset_s)
    }

    #[test]
    fn test_green_path_scenario() {
        // Deadline 6h out, duration 3600s, severity 0.1.
        let now = at(0);
        let deadline = now + Duration::hours(6);
        let eta = now + Duration::seconds(3600);
        let a = assess(deadline, eta, 0.1);
        assert_eq!(a.risk_pct, 13);
        assert_eq!(a.status, Status::Green);
        assert_eq!(a.buffer_minutes, 300);
        assert_eq!(a.suggestion, Status::Green.suggestion());
        assert_eq!(recommend_depart(now, a.status, a.buffer_minutes), now);
        assert_eq!(
            next_interval_seconds(PolicyMode::Balanced, a.status, false),
            2400
        );
    }

    #[test]
    fn test_yellow_late_forecast_scenario() {
        // Deadline 1h out, duration 1800s (ETA in 30 min), severity 0.5.
        let now = at(0);
        let deadline = now + Duration::hours(1);
        let eta = now + Duration::seconds(1800);
        let a = assess(deadline, eta, 0.5);
        assert_eq!(a.risk_pct, 53);
        assert_eq!(a.status, Status::Yellow);
        assert_eq!(a.buffer_minutes, 30);
        assert_eq!(recommend_depart(now, a.status, a.buffer_minutes), now - Duration::minutes(30));
    }

    #[test]
    fn test_red_overdue_scenario() {
        // Deadline 30 min ago, duration 600s, severity 0.8.
        let now = at(0);
        let deadline = now - Duration::minutes(30);
        let eta = now + Duration::seconds(600);
        let a = assess(deadline, eta, 0.8);
        assert_eq!(a.risk_pct, 90);
        assert_eq!(a.status, Status::Red);
        assert_eq!(a.buffer_minutes, -40);
        assert_eq!(recommend_depart(now, a.status, a.buffer_minutes), now - Duration::minutes(60));
    }

    #[test]
    fn test_slack_band_boundaries_are_half_open() {
        // Exactly at a boundary belongs to the higher (safer) band.
        assert_eq!(base_risk(14_400), 0.10);
        assert_eq!(base_risk(14_399), 0.20);
        assert_eq!(base_risk(7_200), 0.20);
        assert_eq!(base_risk(7_199), 0.40);
        assert_eq!(base_risk(0), 0.40);
        assert_eq!(base_risk(-1), 0.70);
        assert_eq!(base_risk(-7_200), 0.70);
        assert_eq!(base_risk(-7_201), 0.85);
    }

    #[test]
    fn test_risk_clamped_to_0_99() {
        let now = at(0);
        let deadline = now - Duration::hours(5);
        let eta = now;
        let a = assess(deadline, eta, 1.0);
        assert!(a.risk_pct <= 99);
    }

    #[test]
    fn test_next_interval_budget_limited_overrides_everything() {
        assert_eq!(
            next_interval_seconds(PolicyMode::Aggressive, Status::Green, true),
            2700
        );
        assert_eq!(
            next_interval_seconds(PolicyMode::Conservative, Status::Red, true),
            2700
        );
    }

    #[test]
    fn test_status_from_glyph_round_trips() {
        assert_eq!(Status::from_glyph("🟢"), Some(Status::Green));
        assert_eq!(Status::from_glyph("🔴"), Some(Status::Red));
        assert_eq!(Status::from_glyph("?"), None);
    }

    #[test]
    fn test_policy_mode_parse() {
        assert_eq!(PolicyMode::parse("balanced"), Some(PolicyMode::Balanced));
        assert_eq!(PolicyMode::parse("bogus"), None);
    }

    #[test]
    fn test_customer_message_format() {
        let now = at(0);
        let msg = customer_message(Status::Yellow, now, now, "buffer=30min, weather_sev=0.50", Status::Yellow.suggestion());
        assert!(msg.starts_with("Atualização: status 🟡."));
        assert!(msg.contains("Motivo: buffer=30min, weather_sev=0.50"));
    }
}
