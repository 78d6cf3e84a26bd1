/// Outcome parsing for raw submissions.
///
/// Accepts named verdicts, likert letters and decimal probabilities.
use crate::constants::DEFAULT_NARROW_WIN;
use crate::error::InvalidEvent;
use crate::types::Outcome;

/// The 5 likert letters in order.
const LIKERT_LETTERS: [char; 5] = ['A', 'B', 'C', 'D', 'E'];

/// Build likert mapping from a narrow-win value.
/// A=left wins, B=narrow_win, C=tie, D=1.0-narrow_win, E=right wins.
fn likert_outcome(index: usize, narrow_win: f64) -> Outcome {
    match index {
        0 => Outcome::LeftWins,
        1 => Outcome::Probability(narrow_win),
        2 => Outcome::Tie,
        3 => Outcome::Probability(1.0 - narrow_win),
        _ => Outcome::RightWins,
    }
}

fn letter_to_index(raw: &str) -> Option<usize> {
    let mut chars = raw.chars();
    let c = chars.next()?;
    // Tolerate "B:" as judges copy the label from the prompt.
    match chars.as_str() {
        "" | ":" => LIKERT_LETTERS.iter().position(|&l| l == c.to_ascii_uppercase()),
        _ => None,
    }
}

/// Parse a submitted outcome with the default narrow-win probability.
pub fn parse_outcome(raw: &str) -> Result<Outcome, InvalidEvent> {
    parse_outcome_with(raw, DEFAULT_NARROW_WIN)
}

/// Parse a submitted outcome.
///
/// Accepted forms, case-insensitive:
/// - `left`, `left_wins`, `l` / `right`, `right_wins`, `r`
/// - `tie`, `draw`
/// - a likert letter `A`-`E`
/// - a probability that the left item wins, e.g. `0.75`
pub fn parse_outcome_with(raw: &str, narrow_win: f64) -> Result<Outcome, InvalidEvent> {
    let trimmed = raw.trim();
    let lower = trimmed.to_ascii_lowercase();

    match lower.as_str() {
        "left" | "left_wins" | "left-wins" | "l" => return Ok(Outcome::LeftWins),
        "right" | "right_wins" | "right-wins" | "r" => return Ok(Outcome::RightWins),
        "tie" | "draw" => return Ok(Outcome::Tie),
        _ => {}
    }

    if let Some(idx) = letter_to_index(trimmed) {
        return Ok(likert_outcome(idx, narrow_win));
    }

    // Only plain decimals: "inf", "nan" and exponents are not judgments.
    let looks_decimal = !lower.is_empty() && lower.chars().all(|c| c.is_ascii_digit() || c == '.');
    if looks_decimal {
        if let Ok(p) = lower.parse::<f64>() {
            if (0.0..=1.0).contains(&p) {
                return Ok(match p {
                    p if p == 1.0 => Outcome::LeftWins,
                    p if p == 0.0 => Outcome::RightWins,
                    p => Outcome::Probability(p),
                });
            }
        }
    }

    Err(InvalidEvent::UnrecognizedOutcome(raw.to_string()))
}

/// Check a typed outcome before it is logged.
pub fn validate_outcome(outcome: Outcome) -> Result<Outcome, InvalidEvent> {
    match outcome {
        Outcome::Probability(p) if !p.is_finite() || !(0.0..=1.0).contains(&p) => {
            Err(InvalidEvent::UnrecognizedOutcome(format!("probability {p}")))
        }
        other => Ok(other),
    }
}
