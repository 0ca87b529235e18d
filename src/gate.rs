//! Access-gating policy.
//!
//! One pure function decides which area of the site a request may reach,
//! from a snapshot of the caller's profile flags and the requested path.
//! Every enforcement point (the page middleware, the `/api/gate/check`
//! route-guard endpoint, and the post-login landing helper) is a thin
//! adapter over [`evaluate`]; none of them carries policy of its own.

/// Paths reachable without a session.
pub const PUBLIC_PATHS: &[&str] = &["/", "/login", "/auth/callback"];

/// Paths a student may visit between finishing the assessment and paying.
const PAYMENT_STAGE_PATHS: &[&str] = &["/app-to-tap", "/coupon", "/payments"];

/// Flags the gate decides on. Adapters fetch these from the session and the
/// profile/counselor tables; a missing profile row never reaches the gate
/// (adapters redirect to `/role-selection` first).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GateSnapshot {
    pub has_session: bool,
    pub has_phone_number: bool,
    pub is_counselor: bool,
    pub atp_done: bool,
    pub payment_done: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateDecision {
    Allow,
    Redirect(&'static str),
}

impl GateDecision {
    pub fn is_allow(&self) -> bool {
        matches!(self, Self::Allow)
    }

    pub fn redirect_target(&self) -> Option<&'static str> {
        match self {
            Self::Allow => None,
            Self::Redirect(target) => Some(target),
        }
    }
}

fn is_public(path: &str) -> bool {
    PUBLIC_PATHS.contains(&path)
}

fn is_counselor_path(path: &str) -> bool {
    path == "/counselor" || path.starts_with("/counselor/")
}

/// Evaluate the gate for one navigation. First matching rule wins:
///
/// 1. no session: public paths only, everything else goes to `/login`;
/// 2. phone number missing: nothing but `/phone` is reachable until it is set;
/// 3. counselor: `/counselor/*` is open, any other path lands on the dashboard;
/// 4. assessment not done: `/app-to-tap` only;
/// 5. assessment done, payment pending: `/app-to-tap`, `/coupon`, `/payments`;
/// 6. fully onboarded: everything.
///
/// Pure and side-effect free. Navigation is the caller's job.
pub fn evaluate(snapshot: &GateSnapshot, path: &str) -> GateDecision {
    if !snapshot.has_session {
        return if is_public(path) {
            GateDecision::Allow
        } else {
            GateDecision::Redirect("/login")
        };
    }

    if !snapshot.has_phone_number {
        return if path == "/phone" {
            GateDecision::Allow
        } else {
            GateDecision::Redirect("/phone")
        };
    }

    if snapshot.is_counselor {
        return if is_counselor_path(path) {
            GateDecision::Allow
        } else {
            GateDecision::Redirect("/counselor/dashboard")
        };
    }

    if !snapshot.atp_done {
        return if path == "/app-to-tap" {
            GateDecision::Allow
        } else {
            GateDecision::Redirect("/app-to-tap")
        };
    }

    if !snapshot.payment_done {
        return if PAYMENT_STAGE_PATHS.contains(&path) {
            GateDecision::Allow
        } else {
            GateDecision::Redirect("/coupon")
        };
    }

    GateDecision::Allow
}

/// Where to send a user right after signing in: the gate's verdict on the
/// landing page. Fully-onboarded users stay on `/`, everyone else gets the
/// next onboarding step.
pub fn landing_path(snapshot: &GateSnapshot) -> &'static str {
    match evaluate(snapshot, "/") {
        GateDecision::Allow => "/",
        GateDecision::Redirect(target) => target,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn student(atp_done: bool, payment_done: bool) -> GateSnapshot {
        GateSnapshot {
            has_session: true,
            has_phone_number: true,
            is_counselor: false,
            atp_done,
            payment_done,
        }
    }

    const SAMPLE_PATHS: &[&str] = &[
        "/",
        "/login",
        "/phone",
        "/app-to-tap",
        "/coupon",
        "/payments",
        "/report",
        "/assessment",
        "/jobs",
        "/externship",
        "/counselor/dashboard",
        "/counselor/students",
    ];

    #[test]
    fn anonymous_users_reach_only_public_paths() {
        let snapshot = GateSnapshot {
            has_session: false,
            has_phone_number: false,
            is_counselor: false,
            atp_done: false,
            payment_done: false,
        };
        for path in SAMPLE_PATHS {
            let decision = evaluate(&snapshot, path);
            if PUBLIC_PATHS.contains(path) {
                assert_eq!(decision, GateDecision::Allow, "expected {path} public");
            } else {
                assert_eq!(decision, GateDecision::Redirect("/login"), "path {path}");
            }
        }
    }

    #[test]
    fn missing_phone_blocks_everything_but_the_prompt() {
        let snapshot = GateSnapshot {
            has_phone_number: false,
            ..student(true, true)
        };
        assert_eq!(evaluate(&snapshot, "/phone"), GateDecision::Allow);
        for path in SAMPLE_PATHS.iter().filter(|p| **p != "/phone") {
            assert_eq!(
                evaluate(&snapshot, path),
                GateDecision::Redirect("/phone"),
                "path {path}"
            );
        }
    }

    #[test]
    fn pre_assessment_student_is_pinned_to_app_to_tap() {
        let snapshot = student(false, false);
        assert_eq!(evaluate(&snapshot, "/app-to-tap"), GateDecision::Allow);
        for path in SAMPLE_PATHS.iter().filter(|p| **p != "/app-to-tap") {
            assert_eq!(
                evaluate(&snapshot, path),
                GateDecision::Redirect("/app-to-tap"),
                "path {path}"
            );
        }
    }

    #[test]
    fn payment_stage_student_reaches_exactly_three_paths() {
        let snapshot = student(true, false);
        for path in SAMPLE_PATHS {
            let decision = evaluate(&snapshot, path);
            if ["/app-to-tap", "/coupon", "/payments"].contains(path) {
                assert_eq!(decision, GateDecision::Allow, "path {path}");
            } else {
                assert_eq!(decision, GateDecision::Redirect("/coupon"), "path {path}");
            }
        }
    }

    #[test]
    fn fully_onboarded_student_is_unrestricted() {
        let snapshot = student(true, true);
        for path in SAMPLE_PATHS {
            assert_eq!(evaluate(&snapshot, path), GateDecision::Allow, "path {path}");
        }
    }

    #[test]
    fn counselors_are_confined_to_counselor_area() {
        let snapshot = GateSnapshot {
            is_counselor: true,
            ..student(false, false)
        };
        assert_eq!(evaluate(&snapshot, "/counselor"), GateDecision::Allow);
        assert_eq!(evaluate(&snapshot, "/counselor/students"), GateDecision::Allow);
        assert_eq!(
            evaluate(&snapshot, "/report"),
            GateDecision::Redirect("/counselor/dashboard")
        );
        // Segment-aware match: /counselorship is not a counselor path.
        assert_eq!(
            evaluate(&snapshot, "/counselorship"),
            GateDecision::Redirect("/counselor/dashboard")
        );
    }

    #[test]
    fn counselor_flags_take_precedence_over_student_flags() {
        // A counselor row wins even if the profile flags look like a stalled student.
        let snapshot = GateSnapshot {
            is_counselor: true,
            ..student(false, false)
        };
        assert_eq!(evaluate(&snapshot, "/counselor/reports"), GateDecision::Allow);
    }

    #[test]
    fn landing_path_follows_onboarding_progress() {
        assert_eq!(landing_path(&student(false, false)), "/app-to-tap");
        assert_eq!(landing_path(&student(true, false)), "/coupon");
        assert_eq!(landing_path(&student(true, true)), "/");
        assert_eq!(
            landing_path(&GateSnapshot {
                is_counselor: true,
                ..student(true, true)
            }),
            "/counselor/dashboard"
        );
        assert_eq!(
            landing_path(&GateSnapshot {
                has_session: false,
                ..student(false, false)
            }),
            "/"
        );
    }

    #[test]
    fn evaluation_is_idempotent() {
        let snapshot = student(true, false);
        let first = evaluate(&snapshot, "/report");
        let second = evaluate(&snapshot, "/report");
        assert_eq!(first, second);
    }
}
