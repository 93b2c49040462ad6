pub const START_CELL: u8 = 1;
pub const BOARD_END: u8 = 100;

/// Ladder (forward) and snake (backward) cell pairs per difficulty.
const EASY_JUMPS: &[(u8, u8)] = &[
    (3, 21),
    (8, 30),
    (28, 55),
    (36, 63),
    (51, 72),
    (71, 92),
    (25, 5),
    (49, 29),
    (67, 47),
    (88, 66),
    (96, 76),
];

const MEDIUM_JUMPS: &[(u8, u8)] = &[
    (4, 14),
    (9, 31),
    (21, 42),
    (28, 50),
    (40, 61),
    (63, 84),
    (19, 7),
    (35, 16),
    (48, 27),
    (66, 45),
    (79, 58),
    (93, 73),
    (98, 79),
];

const HARD_JUMPS: &[(u8, u8)] = &[
    (2, 12),
    (11, 26),
    (22, 40),
    (45, 64),
    (70, 88),
    (17, 4),
    (31, 10),
    (43, 21),
    (57, 36),
    (69, 49),
    (78, 54),
    (87, 60),
    (95, 72),
    (99, 80),
];

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Difficulty {
    Easy,
    Medium,
    Hard,
}

impl Difficulty {
    /// Unrecognized input falls back to medium.
    pub fn parse(raw: Option<&str>) -> Self {
        match raw.map(|value| value.trim().to_lowercase()).as_deref() {
            Some("easy") => Difficulty::Easy,
            Some("hard") => Difficulty::Hard,
            _ => Difficulty::Medium,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Difficulty::Easy => "easy",
            Difficulty::Medium => "medium",
            Difficulty::Hard => "hard",
        }
    }

    fn jumps(self) -> &'static [(u8, u8)] {
        match self {
            Difficulty::Easy => EASY_JUMPS,
            Difficulty::Medium => MEDIUM_JUMPS,
            Difficulty::Hard => HARD_JUMPS,
        }
    }
}

pub fn jump_target(difficulty: Difficulty, cell: u8) -> u8 {
    difficulty
        .jumps()
        .iter()
        .find(|(from, _)| *from == cell)
        .map_or(cell, |(_, to)| *to)
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RollKind {
    /// The roll would pass cell 100; the player stays but the turn is spent.
    Overshoot,
    /// The landing cell was a snake or ladder.
    Jumped { from: u8, to: u8 },
    Moved,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RollResult {
    pub position: u8,
    pub kind: RollKind,
    pub won: bool,
}

pub fn apply_roll(position: u8, roll: u8, difficulty: Difficulty) -> RollResult {
    let moved = u16::from(position) + u16::from(roll);
    if moved > u16::from(BOARD_END) {
        return RollResult {
            position,
            kind: RollKind::Overshoot,
            won: false,
        };
    }

    let landing = moved as u8;
    let target = jump_target(difficulty, landing);
    let kind = if target == landing {
        RollKind::Moved
    } else {
        RollKind::Jumped {
            from: landing,
            to: target,
        }
    };

    RollResult {
        position: target,
        kind,
        won: target == BOARD_END,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn difficulty_parse_defaults_to_medium() {
        assert_eq!(Difficulty::parse(Some("easy")), Difficulty::Easy);
        assert_eq!(Difficulty::parse(Some(" HARD ")), Difficulty::Hard);
        assert_eq!(Difficulty::parse(Some("nightmare")), Difficulty::Medium);
        assert_eq!(Difficulty::parse(None), Difficulty::Medium);
    }

    #[test]
    fn overshoot_keeps_position() {
        let result = apply_roll(95, 6, Difficulty::Medium);
        assert_eq!(result.position, 95);
        assert_eq!(result.kind, RollKind::Overshoot);
        assert!(!result.won);
    }

    #[test]
    fn ladder_moves_forward() {
        // Medium has a ladder from 9 to 31.
        let result = apply_roll(5, 4, Difficulty::Medium);
        assert_eq!(result.position, 31);
        assert_eq!(result.kind, RollKind::Jumped { from: 9, to: 31 });
    }

    #[test]
    fn snake_moves_backward() {
        // Medium has a snake from 98 to 79.
        let result = apply_roll(95, 3, Difficulty::Medium);
        assert_eq!(result.position, 79);
        assert_eq!(result.kind, RollKind::Jumped { from: 98, to: 79 });
        assert!(!result.won);
    }

    #[test]
    fn exact_hundred_wins() {
        let result = apply_roll(97, 3, Difficulty::Medium);
        assert_eq!(result.position, 100);
        assert_eq!(result.kind, RollKind::Moved);
        assert!(result.won);
    }

    #[test]
    fn plain_move_has_no_jump() {
        let result = apply_roll(10, 2, Difficulty::Medium);
        assert_eq!(result.position, 12);
        assert_eq!(result.kind, RollKind::Moved);
    }

    #[test]
    fn jump_tables_differ_per_difficulty() {
        assert_eq!(jump_target(Difficulty::Easy, 3), 21);
        assert_eq!(jump_target(Difficulty::Hard, 2), 12);
        assert_eq!(jump_target(Difficulty::Hard, 99), 80);
        assert_eq!(jump_target(Difficulty::Medium, 50), 50);
    }
}
