//! Answers roll requests with pseudo-random outcomes.

use rand::Rng;
use rollcall_core::{CodecError, CompletedRollDescriptor, RollDescriptor, SupportedDice};
use tracing::warn;

/// Most dice a single descriptor may ask for.
pub const MAX_DICE_PER_DESCRIPTOR: u32 = 1_000;

/// Most dice a whole request may ask for.
pub const MAX_DICE_PER_REQUEST: u64 = 10_000;

/// Roll every descriptor in `rolls`, in order.
///
/// Dice the server does not advertise are still rolled, with a warning.
/// Requests over [`MAX_DICE_PER_DESCRIPTOR`] or [`MAX_DICE_PER_REQUEST`] are
/// rejected before anything is rolled.
pub fn roll_batch<R: Rng + ?Sized>(
    rng: &mut R,
    rolls: &[RollDescriptor],
    supported: &SupportedDice,
) -> Result<Vec<CompletedRollDescriptor>, CodecError> {
    check_size(rolls)?;
    rolls
        .iter()
        .map(|descriptor| {
            descriptor.validate()?;
            if !supported.supports(descriptor.faces) {
                warn!(dice = %descriptor, "rolling a die that is not advertised");
            }
            let outcomes = (0..descriptor.amount)
                .map(|_| rng.random_range(1..=descriptor.faces))
                .collect();
            descriptor.complete(outcomes)
        })
        .collect()
}

fn check_size(rolls: &[RollDescriptor]) -> Result<(), CodecError> {
    if let Some(big) = rolls.iter().find(|d| d.amount > MAX_DICE_PER_DESCRIPTOR) {
        return Err(CodecError::InvalidDescriptor(format!(
            "{big}: at most {MAX_DICE_PER_DESCRIPTOR} dice per descriptor"
        )));
    }
    let total: u64 = rolls.iter().map(|d| u64::from(d.amount)).sum();
    if total > MAX_DICE_PER_REQUEST {
        return Err(CodecError::InvalidDescriptor(format!(
            "{total} dice requested, at most {MAX_DICE_PER_REQUEST} per request"
        )));
    }
    Ok(())
}

/// Render a completed descriptor as `NdF: [a, b, ...]`.
pub fn format_result(result: &CompletedRollDescriptor) -> String {
    let outcomes: Vec<String> = result.completed_rolls.iter().map(u32::to_string).collect();
    format!("{}: [{}]", result.descriptor(), outcomes.join(", "))
}
