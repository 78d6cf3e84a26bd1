/// Prior mean of every item's latent merit.
pub const DEFAULT_PRIOR_MEAN: f64 = 0.0;

/// Prior variance of every item's latent merit (unit variance).
pub const DEFAULT_PRIOR_VARIANCE: f64 = 1.0;

/// Standard deviation of a single judge's perception noise.
///
/// In the Thurstone model a judge sees `merit + N(0, β²)` for each item and
/// reports whichever looks better, so the outcome noise on the difference
/// is `2β²`. At 0.5, a merit gap of 0.7 produces roughly an 84/16 split.
pub const DEFAULT_JUDGE_NOISE: f64 = 0.5;

/// Half-width of the merit difference a judge reports as a tie.
pub const DEFAULT_DRAW_MARGIN: f64 = 0.1;

/// Variance floor. Repeated comparisons shrink variance geometrically;
/// without a floor a long-running session eventually locks items in place.
pub const DEFAULT_MIN_VARIANCE: f64 = 1e-4;

/// Soft outcomes are clamped into `[SOFT_OUTCOME_EPSILON, 1 - SOFT_OUTCOME_EPSILON]`.
/// Exact 0.0 and 1.0 are routed to the decisive update instead.
pub const SOFT_OUTCOME_EPSILON: f64 = 1e-6;

/// Below this mixture mass the update falls back to its asymptotic limit.
pub const MIN_LIKELIHOOD_MASS: f64 = 1e-12;

/// P(adjacent pair is ordered correctly) required before the ranking counts
/// as confident.
pub const DEFAULT_CONFIDENCE_THRESHOLD: f64 = 0.95;

/// Maximum number of nearby items to consider when selecting an opponent.
///
/// Items whose means are far apart are almost never the most informative
/// pair, so candidates are restricted to a window in mean order. This turns
/// selection from O(N^2) into O(N * W) per request.
///
/// For lists smaller than this value, all pairs are considered.
pub const OPPONENT_WINDOW_SIZE: usize = 100;

/// Applied events between automatic checkpoints.
pub const DEFAULT_CHECKPOINT_INTERVAL: u64 = 500;

/// Number of checkpoints kept on disk after pruning.
pub const DEFAULT_RETAIN_CHECKPOINTS: usize = 2;

/// Applied events between convergence history samples. 0 disables sampling.
pub const DEFAULT_HISTORY_INTERVAL: u64 = 25;

/// Upper bound on retained convergence history points.
pub const MAX_HISTORY_POINTS: usize = 1024;

/// Default probability for a "narrow win" verdict (B and D on the likert scale).
pub const DEFAULT_NARROW_WIN: f64 = 0.8;

/// Longest accepted item or judge identifier, in bytes.
pub const MAX_ID_LEN: usize = 128;
