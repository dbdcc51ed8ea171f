use serde::{Deserialize, Serialize};

use super::{AppAction, ProposalContext};
use crate::{
    abiencode::{AbiEncode, Token},
    channel::{Outcome, TwoPartyFixedOutcome},
    error::ValidationError,
    Address,
};

const EMPTY: u8 = 0;
const DRAW: u8 = 3;

const LINES: [[(usize, usize); 3]; 8] = [
    [(0, 0), (0, 1), (0, 2)],
    [(1, 0), (1, 1), (1, 2)],
    [(2, 0), (2, 1), (2, 2)],
    [(0, 0), (1, 0), (2, 0)],
    [(0, 1), (1, 1), (2, 1)],
    [(0, 2), (1, 2), (2, 2)],
    [(0, 0), (1, 1), (2, 2)],
    [(0, 2), (1, 1), (2, 0)],
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TicTacToeState {
    pub players: [Address; 2],
    pub turn_num: u64,
    /// 0 while running, 1 or 2 for the winning player, 3 for a draw.
    pub winner: u8,
    pub board: [[u8; 3]; 3],
}

impl TicTacToeState {
    pub fn new(players: [Address; 2]) -> Self {
        Self {
            players,
            turn_num: 0,
            winner: EMPTY,
            board: [[EMPTY; 3]; 3],
        }
    }

    fn winning_mark(&self) -> Option<u8> {
        LINES.iter().find_map(|line| {
            let [a, b, c] = line.map(|(x, y)| self.board[x][y]);
            (a != EMPTY && a == b && b == c).then_some(a)
        })
    }

    fn board_full(&self) -> bool {
        self.board.iter().flatten().all(|cell| *cell != EMPTY)
    }

    pub(super) fn apply(&self, action: &AppAction, actor: Address) -> Result<Self, ValidationError> {
        let (x, y) = match action {
            AppAction::PlaceMark { x, y } => (*x as usize, *y as usize),
            other => {
                return Err(ValidationError::InvalidAction(format!(
                    "{:?} is not a tic tac toe action",
                    other
                )))
            }
        };
        if self.winner != EMPTY {
            return Err(ValidationError::InvalidAction("game is over".into()));
        }
        let turn = (self.turn_num % 2) as usize;
        if actor != self.players[turn] {
            return Err(ValidationError::InvalidAction("not your turn".into()));
        }
        if x > 2 || y > 2 || self.board[x][y] != EMPTY {
            return Err(ValidationError::InvalidAction(format!(
                "cannot place a mark at ({}, {})",
                x, y
            )));
        }

        let mut next = self.clone();
        next.board[x][y] = turn as u8 + 1;
        next.turn_num += 1;
        next.winner = match next.winning_mark() {
            Some(mark) => mark,
            None if next.board_full() => DRAW,
            None => EMPTY,
        };
        Ok(next)
    }

    pub(super) fn outcome(&self) -> Outcome {
        Outcome::TwoPartyFixed(match self.winner {
            1 => TwoPartyFixedOutcome::SendToAddrOne,
            2 => TwoPartyFixedOutcome::SendToAddrTwo,
            _ => TwoPartyFixedOutcome::SplitAndSendToBoth,
        })
    }

    pub(super) fn validate_initial(&self, ctx: &ProposalContext) -> Result<(), ValidationError> {
        let deposits = &ctx.proposal.deposits;
        if self.players != [deposits.initiator, deposits.responder] {
            return Err(ValidationError::App(
                "players must be the initiator and the responder".into(),
            ));
        }
        if *self != Self::new(self.players) {
            return Err(ValidationError::App("game must start on an empty board".into()));
        }
        Ok(())
    }
}

impl AbiEncode for TicTacToeState {
    fn to_token(&self) -> Token {
        let board = self
            .board
            .iter()
            .map(|row| Token::FixedArray(row.iter().map(|c| Token::uint(*c as u64)).collect()))
            .collect();
        Token::Tuple(vec![
            Token::FixedArray(self.players.iter().map(AbiEncode::to_token).collect()),
            Token::uint(self.turn_num),
            Token::uint(self.winner as u64),
            Token::FixedArray(board),
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const A: Address = Address([1; 20]);
    const B: Address = Address([2; 20]);

    fn play(moves: &[(u8, u8)]) -> Result<TicTacToeState, ValidationError> {
        let mut state = TicTacToeState::new([A, B]);
        for (i, (x, y)) in moves.iter().enumerate() {
            let actor = if i % 2 == 0 { A } else { B };
            state = state.apply(&AppAction::PlaceMark { x: *x, y: *y }, actor)?;
        }
        Ok(state)
    }

    #[test]
    fn first_player_wins_a_row() {
        let state = play(&[(0, 0), (1, 0), (0, 1), (1, 1), (0, 2)]).unwrap();
        assert_eq!(state.winner, 1);
        assert_eq!(
            state.outcome(),
            Outcome::TwoPartyFixed(TwoPartyFixedOutcome::SendToAddrOne)
        );
        assert!(state
            .apply(&AppAction::PlaceMark { x: 2, y: 2 }, B)
            .is_err());
    }

    #[test]
    fn full_board_without_line_is_a_draw() {
        let state = play(&[
            (0, 0),
            (0, 1),
            (0, 2),
            (1, 1),
            (1, 0),
            (1, 2),
            (2, 1),
            (2, 0),
            (2, 2),
        ])
        .unwrap();
        assert_eq!(state.winner, DRAW);
        assert_eq!(
            state.outcome(),
            Outcome::TwoPartyFixed(TwoPartyFixedOutcome::SplitAndSendToBoth)
        );
    }

    #[test]
    fn illegal_moves_are_rejected() {
        let state = TicTacToeState::new([A, B]);
        // wrong player
        assert!(state.apply(&AppAction::PlaceMark { x: 0, y: 0 }, B).is_err());
        // off the board
        assert!(state.apply(&AppAction::PlaceMark { x: 3, y: 0 }, A).is_err());
        // occupied
        assert!(play(&[(0, 0), (0, 0)]).is_err());
    }
}
