//! Dice data model carried by roll requests and responses.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::errors::CodecError;

/// A request for `amount` independent outcomes of a die with `faces` faces.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RollDescriptor {
    /// Number of dice (the `N` in `NdF`).
    pub amount: u32,
    /// Faces per die (the `F` in `NdF`).
    pub faces: u32,
}

impl RollDescriptor {
    /// Build a descriptor, rejecting zero amounts or faces.
    pub fn new(amount: u32, faces: u32) -> Result<Self, CodecError> {
        let descriptor = Self { amount, faces };
        descriptor.validate()?;
        Ok(descriptor)
    }

    /// Check that both fields are positive.
    pub fn validate(&self) -> Result<(), CodecError> {
        if self.amount == 0 {
            return Err(CodecError::InvalidDescriptor(format!(
                "{self}: amount must be positive"
            )));
        }
        if self.faces == 0 {
            return Err(CodecError::InvalidDescriptor(format!(
                "{self}: faces must be positive"
            )));
        }
        Ok(())
    }

    /// Pair this descriptor with its realized outcomes.
    pub fn complete(self, rolls: Vec<u32>) -> Result<CompletedRollDescriptor, CodecError> {
        let completed = CompletedRollDescriptor {
            amount: self.amount,
            faces: self.faces,
            completed_rolls: rolls,
        };
        completed.validate()?;
        Ok(completed)
    }
}

impl fmt::Display for RollDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}d{}", self.amount, self.faces)
    }
}

/// Parses dice notation: `2d6`, `1D20`, or `d8` (amount defaults to 1).
impl FromStr for RollDescriptor {
    type Err = CodecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let (amount, faces) = trimmed
            .split_once(['d', 'D'])
            .ok_or_else(|| CodecError::InvalidDescriptor(format!("`{trimmed}` is not NdF notation")))?;
        let amount = if amount.is_empty() {
            1
        } else {
            amount
                .parse()
                .map_err(|_| CodecError::InvalidDescriptor(format!("bad amount in `{trimmed}`")))?
        };
        let faces = faces
            .parse()
            .map_err(|_| CodecError::InvalidDescriptor(format!("bad faces in `{trimmed}`")))?;
        Self::new(amount, faces)
    }
}

/// A descriptor together with its realized outcomes.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletedRollDescriptor {
    /// Number of dice rolled.
    pub amount: u32,
    /// Faces per die.
    pub faces: u32,
    /// One outcome per die, in roll order.
    pub completed_rolls: Vec<u32>,
}

impl CompletedRollDescriptor {
    /// The descriptor this result answers.
    pub fn descriptor(&self) -> RollDescriptor {
        RollDescriptor {
            amount: self.amount,
            faces: self.faces,
        }
    }

    /// Whether exactly `amount` outcomes are present.
    pub fn is_complete(&self) -> bool {
        usize::try_from(self.amount).is_ok_and(|amount| amount == self.completed_rolls.len())
    }

    /// Check positivity and completeness.
    pub fn validate(&self) -> Result<(), CodecError> {
        self.descriptor().validate()?;
        if !self.is_complete() {
            return Err(CodecError::InvalidDescriptor(format!(
                "{}: expected {} outcomes, got {}",
                self.descriptor(),
                self.amount,
                self.completed_rolls.len()
            )));
        }
        Ok(())
    }
}

/// One entry of a server's supported dice advertisement.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "DieRepr", into = "DieRepr")]
pub enum SupportedDie {
    /// A die with this many faces.
    Faces(u32),
    /// Any die is acceptable.
    All,
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum DieRepr {
    Faces(u32),
    Keyword(String),
}

impl TryFrom<DieRepr> for SupportedDie {
    type Error = String;

    fn try_from(repr: DieRepr) -> Result<Self, Self::Error> {
        match repr {
            DieRepr::Faces(0) => Err("die faces must be positive".into()),
            DieRepr::Faces(n) => Ok(Self::Faces(n)),
            DieRepr::Keyword(k) if k == "all" => Ok(Self::All),
            DieRepr::Keyword(k) => Err(format!("unknown supported die `{k}`")),
        }
    }
}

impl From<SupportedDie> for DieRepr {
    fn from(die: SupportedDie) -> Self {
        match die {
            SupportedDie::Faces(n) => Self::Faces(n),
            SupportedDie::All => Self::Keyword("all".into()),
        }
    }
}

impl FromStr for SupportedDie {
    type Err = CodecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("all") {
            return Ok(Self::All);
        }
        match s.trim_start_matches(['d', 'D']).parse::<u32>() {
            Ok(n) if n > 0 => Ok(Self::Faces(n)),
            _ => Err(CodecError::InvalidDescriptor(format!(
                "`{s}` is not a die face count or `all`"
            ))),
        }
    }
}

/// The set of dice a server accepts, advertised to every connection.
///
/// Order is preserved for the wire; duplicates are dropped on construction.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<SupportedDie>", into = "Vec<SupportedDie>")]
pub struct SupportedDice(Vec<SupportedDie>);

impl SupportedDice {
    /// Build from any iterator of dice, keeping first occurrences.
    pub fn new(dice: impl IntoIterator<Item = SupportedDie>) -> Self {
        let mut out: Vec<SupportedDie> = Vec::new();
        for die in dice {
            if !out.contains(&die) {
                out.push(die);
            }
        }
        Self(out)
    }

    /// Accept every die.
    pub fn all() -> Self {
        Self(vec![SupportedDie::All])
    }

    /// Accept exactly these face counts.
    pub fn faces(faces: impl IntoIterator<Item = u32>) -> Self {
        Self::new(faces.into_iter().map(SupportedDie::Faces))
    }

    /// Whether a die with `faces` faces is acceptable.
    pub fn supports(&self, faces: u32) -> bool {
        self.0
            .iter()
            .any(|d| matches!(d, SupportedDie::All) || *d == SupportedDie::Faces(faces))
    }

    /// The advertised entries in order.
    pub fn as_slice(&self) -> &[SupportedDie] {
        &self.0
    }
}

impl Default for SupportedDice {
    fn default() -> Self {
        Self::all()
    }
}

impl From<Vec<SupportedDie>> for SupportedDice {
    fn from(dice: Vec<SupportedDie>) -> Self {
        Self::new(dice)
    }
}

impl From<SupportedDice> for Vec<SupportedDie> {
    fn from(dice: SupportedDice) -> Self {
        dice.0
    }
}

/// Parses a comma separated list such as `4,6,d20,all`.
impl FromStr for SupportedDice {
    type Err = CodecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let dice = s
            .split(',')
            .filter(|part| !part.trim().is_empty())
            .map(str::parse)
            .collect::<Result<Vec<SupportedDie>, _>>()?;
        if dice.is_empty() {
            return Err(CodecError::InvalidDescriptor("empty dice list".into()));
        }
        Ok(Self::new(dice))
    }
}

/// What an await-style caller receives when its request settles.
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub struct RollOutcome {
    /// Results from the responder; empty when cancelled.
    pub completed_rolls: Vec<CompletedRollDescriptor>,
    /// Whether the request was cancelled instead of answered.
    pub cancelled: bool,
}

impl RollOutcome {
    /// An answered request.
    pub fn completed(completed_rolls: Vec<CompletedRollDescriptor>) -> Self {
        Self {
            completed_rolls,
            cancelled: false,
        }
    }

    /// A cancelled request.
    pub fn cancelled() -> Self {
        Self {
            completed_rolls: Vec::new(),
            cancelled: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use proptest::prelude::*;
    use serde_json::json;

    use super::*;

    #[test]
    fn descriptor_rejects_zero() {
        assert_matches!(RollDescriptor::new(0, 6), Err(CodecError::InvalidDescriptor(_)));
        assert_matches!(RollDescriptor::new(2, 0), Err(CodecError::InvalidDescriptor(_)));
        assert!(RollDescriptor::new(2, 6).is_ok());
    }

    #[test]
    fn notation_parses() {
        assert_eq!("2d6".parse::<RollDescriptor>().unwrap(), RollDescriptor { amount: 2, faces: 6 });
        assert_eq!("d20".parse::<RollDescriptor>().unwrap(), RollDescriptor { amount: 1, faces: 20 });
        assert_eq!(" 4D12 ".parse::<RollDescriptor>().unwrap(), RollDescriptor { amount: 4, faces: 12 });
        assert!("6".parse::<RollDescriptor>().is_err());
        assert!("2dx".parse::<RollDescriptor>().is_err());
        assert!("0d6".parse::<RollDescriptor>().is_err());
    }

    #[test]
    fn completed_length_must_match_amount() {
        let d = RollDescriptor::new(2, 6).unwrap();
        let done = d.complete(vec![3, 5]).unwrap();
        assert!(done.is_complete());
        assert_eq!(done.descriptor(), d);
        assert_matches!(d.complete(vec![3]), Err(CodecError::InvalidDescriptor(_)));
        assert_matches!(d.complete(vec![1, 2, 3]), Err(CodecError::InvalidDescriptor(_)));
    }

    #[test]
    fn completed_wire_shape() {
        let done = RollDescriptor::new(2, 6).unwrap().complete(vec![3, 5]).unwrap();
        assert_eq!(
            serde_json::to_value(&done).unwrap(),
            json!({"amount": 2, "faces": 6, "completedRolls": [3, 5]})
        );
    }

    #[test]
    fn supported_dice_wire_shape() {
        let dice = SupportedDice::new([SupportedDie::Faces(4), SupportedDie::All]);
        assert_eq!(serde_json::to_value(&dice).unwrap(), json!([4, "all"]));
        let back: SupportedDice = serde_json::from_value(json!([4, "all"])).unwrap();
        assert_eq!(back, dice);
    }

    #[test]
    fn supported_dice_rejects_unknown_keyword_and_zero() {
        assert!(serde_json::from_value::<SupportedDice>(json!(["some"])).is_err());
        assert!(serde_json::from_value::<SupportedDice>(json!([0])).is_err());
    }

    #[test]
    fn supported_dice_dedups_and_supports() {
        let dice = SupportedDice::faces([6, 6, 20]);
        assert_eq!(dice.as_slice(), &[SupportedDie::Faces(6), SupportedDie::Faces(20)]);
        assert!(dice.supports(6));
        assert!(!dice.supports(8));
        assert!(SupportedDice::default().supports(7));
    }

    #[test]
    fn supported_dice_from_list() {
        let dice: SupportedDice = "4, d6,all".parse().unwrap();
        assert_eq!(
            dice.as_slice(),
            &[SupportedDie::Faces(4), SupportedDie::Faces(6), SupportedDie::All]
        );
        assert!("".parse::<SupportedDice>().is_err());
        assert!("4,zero".parse::<SupportedDice>().is_err());
    }

    #[test]
    fn outcome_constructors() {
        assert!(RollOutcome::cancelled().cancelled);
        assert!(RollOutcome::cancelled().completed_rolls.is_empty());
        assert!(!RollOutcome::completed(vec![]).cancelled);
    }

    proptest! {
        #[test]
        fn notation_display_parses_back(amount in 1u32..1000, faces in 1u32..1000) {
            let d = RollDescriptor { amount, faces };
            prop_assert_eq!(d.to_string().parse::<RollDescriptor>().unwrap(), d);
        }
    }
}
