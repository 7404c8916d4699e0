use serde::Serialize;
use std::cmp::Ordering;
use std::collections::HashMap;

/// One-decimal display rounding, half away from zero.
/// All percentages shown to users (and all tie comparisons) go through this.
pub fn round_half_away_1dp(x: f64) -> f64 {
    (((x.abs() * 10.0) + 0.5).floor() / 10.0) * x.signum()
}

/// A student's term percentage for one subject. `NoData` means not a single
/// assessment has a recorded score; it displays as 0.0 but must never be
/// conflated with a real 0%.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Aggregate {
    NoData,
    Percent(f64),
}

impl Aggregate {
    pub fn has_data(self) -> bool {
        matches!(self, Aggregate::Percent(_))
    }

    pub fn display_percent(self) -> f64 {
        match self {
            Aggregate::NoData => 0.0,
            Aggregate::Percent(p) => round_half_away_1dp(p),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PlanDef {
    pub id: String,
    pub title: String,
    pub max_score: f64,
    pub weight: f64,
    pub sort_order: i64,
}

#[derive(Debug, Clone)]
pub struct GradeEntry {
    pub assessment_plan_id: String,
    pub score: Option<f64>,
    pub is_locked: bool,
}

/// Weighted aggregate over whatever subset of plans has a recorded score.
///
/// Each scored plan contributes `(score / max_score * 100) * (weight / 100)`
/// and its weight joins the denominator, so a partially graded term
/// re-normalizes instead of treating missing scores as zero. Plans with a
/// non-positive max score are skipped (the snapshot loader warns about them).
pub fn compute_student_percentage(grades: &[GradeEntry], plans: &[PlanDef]) -> Aggregate {
    let mut by_plan: HashMap<&str, &GradeEntry> = HashMap::new();
    for g in grades {
        by_plan.insert(g.assessment_plan_id.as_str(), g);
    }

    let mut weighted_total = 0.0_f64;
    let mut total_weight = 0.0_f64;
    for plan in plans {
        if plan.max_score <= 0.0 {
            continue;
        }
        let Some(score) = by_plan.get(plan.id.as_str()).and_then(|g| g.score) else {
            continue;
        };
        weighted_total += (score / plan.max_score * 100.0) * (plan.weight / 100.0);
        total_weight += plan.weight;
    }

    if total_weight <= 0.0 {
        return Aggregate::NoData;
    }
    Aggregate::Percent(weighted_total / total_weight * 100.0)
}

#[derive(Debug, Clone)]
pub struct ScaleStep {
    pub grade_label: String,
    pub comment: String,
    pub min_percent: f64,
    pub max_percent: f64,
    pub sort_order: i64,
}

/// First step in stored order whose inclusive range contains the percentage.
/// Overlapping bands resolve by stored order; no closest-band fallback.
/// Callers resolve against the display-rounded percentage.
pub fn resolve_grade(percent: f64, steps: &[ScaleStep]) -> Option<&ScaleStep> {
    steps
        .iter()
        .find(|s| s.min_percent <= percent && percent <= s.max_percent)
}

#[derive(Debug, Clone)]
pub struct ClassStanding {
    pub student_id: String,
    pub display_name: String,
    pub sort_order: i64,
    pub aggregate: Aggregate,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RankedStudent {
    pub student_id: String,
    pub display_name: String,
    pub percentage: f64,
    pub has_data: bool,
    pub rank: usize,
}

/// Competition ranking: ties share a rank, the next distinct percentage
/// skips ahead by the tie-group size ([90, 70, 70, 50] -> [1, 2, 2, 4]).
///
/// Ordering and tie detection both use the rounded display percentage so
/// float noise cannot split a tie. NoData rows sort as 0.0 but keep
/// `has_data = false`. Ties break by roster sort order for determinism.
pub fn rank_class(mut standings: Vec<ClassStanding>) -> Vec<RankedStudent> {
    standings.sort_by(|a, b| {
        b.aggregate
            .display_percent()
            .partial_cmp(&a.aggregate.display_percent())
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.sort_order.cmp(&b.sort_order))
    });

    let mut out = Vec::with_capacity(standings.len());
    let mut rank = 0_usize;
    let mut previous: Option<f64> = None;
    for (i, s) in standings.into_iter().enumerate() {
        let pct = s.aggregate.display_percent();
        if previous != Some(pct) {
            rank = i + 1;
        }
        previous = Some(pct);
        out.push(RankedStudent {
            student_id: s.student_id,
            display_name: s.display_name,
            percentage: pct,
            has_data: s.aggregate.has_data(),
            rank,
        });
    }
    out
}

/// Pass threshold for subject analysis. Hard-coded for now; making it
/// per-school configuration is an open question.
pub const PASS_THRESHOLD_PERCENT: f64 = 50.0;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GradeBandCount {
    pub grade_label: String,
    pub min_percent: f64,
    pub max_percent: f64,
    pub count: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectAnalysis {
    pub average_score: f64,
    pub pass_rate: f64,
    pub total_graded: usize,
    pub total_students: usize,
    pub grade_distribution: Vec<GradeBandCount>,
}

/// Class-wide statistics over one aggregate per enrolled student.
///
/// NoData students count toward `total_students` only; they are excluded
/// from the average, the pass rate and the grade distribution. With no
/// assessment plans every aggregate is NoData and the result collapses to a
/// stable zero-filled shape.
pub fn analyze_subject(aggregates: &[Aggregate], steps: &[ScaleStep]) -> SubjectAnalysis {
    let graded: Vec<f64> = aggregates
        .iter()
        .filter(|a| a.has_data())
        .map(|a| a.display_percent())
        .collect();
    let total_graded = graded.len();

    let average_score = if total_graded > 0 {
        round_half_away_1dp(graded.iter().sum::<f64>() / total_graded as f64)
    } else {
        0.0
    };

    let pass_count = graded
        .iter()
        .filter(|p| **p >= PASS_THRESHOLD_PERCENT)
        .count();
    let pass_rate = if total_graded > 0 {
        round_half_away_1dp(100.0 * pass_count as f64 / total_graded as f64)
    } else {
        0.0
    };

    let mut ordered: Vec<&ScaleStep> = steps.iter().collect();
    ordered.sort_by(|a, b| {
        b.min_percent
            .partial_cmp(&a.min_percent)
            .unwrap_or(Ordering::Equal)
    });
    let grade_distribution = ordered
        .into_iter()
        .map(|step| GradeBandCount {
            grade_label: step.grade_label.clone(),
            min_percent: step.min_percent,
            max_percent: step.max_percent,
            count: graded
                .iter()
                .filter(|p| step.min_percent <= **p && **p <= step.max_percent)
                .count(),
        })
        .collect();

    SubjectAnalysis {
        average_score,
        pass_rate,
        total_graded,
        total_students: aggregates.len(),
        grade_distribution,
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CalcError {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl CalcError {
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
            details: None,
        }
    }
}
