// src/eval/mod.rs
//
// Tapered static evaluation. Two tallies (midgame/endgame) are blended by
// a 0-24 game phase and returned from the side to move's perspective.
// Results are memoized in a concurrent map keyed by Zobrist hash so the
// workers share one cache without a global lock.

pub mod pst;

use chess::{
    get_adjacent_files, get_bishop_moves, get_file, get_knight_moves, get_rank, get_rook_moves,
    BitBoard, Board, Color, File, Piece, Rank, Square, EMPTY,
};
use dashmap::DashMap;

use self::pst::Pst;

const BISHOP_PAIR_MG: i32 = 30;
const BISHOP_PAIR_EG: i32 = 35;

const DOUBLED_MG: i32 = 10;
const DOUBLED_EG: i32 = 8;
const ISOLATED_MG: i32 = 8;
const ISOLATED_EG: i32 = 6;

/// Passed-pawn bonus indexed by rank from the pawn's own side.
const PASSED_MG: [i32; 8] = [0, 5, 10, 20, 35, 60, 100, 0];
const PASSED_EG: [i32; 8] = [0, 10, 20, 40, 60, 100, 160, 0];

const KNIGHT_RIM_MG: i32 = 15;
const KNIGHT_RIM_EG: i32 = 10;

const ROOK_OPEN_MG: i32 = 15;
const ROOK_OPEN_EG: i32 = 10;
const ROOK_SEMI_MG: i32 = 10;
const ROOK_SEMI_EG: i32 = 5;

const ROOKS_CONNECTED: i32 = 10;

const SHIELD_MISSING_MG: i32 = 15;
const SHIELD_MISSING_EG: i32 = 5;
const SHIELD_FAR_MG: i32 = 8;
const SHIELD_FAR_EG: i32 = 3;

const MOBILITY_MG: i32 = 4;
const MOBILITY_EG: i32 = 2;

const TEMPO: i32 = 8;

pub struct Evaluator {
    cache: DashMap<u64, i32>,
}

impl Evaluator {
    pub fn new() -> Self {
        Self {
            cache: DashMap::new(),
        }
    }

    pub fn clear_cache(&self) {
        self.cache.clear();
    }

    pub fn cache_len(&self) -> usize {
        self.cache.len()
    }

    /// Centipawn score of `board` from the side to move.
    pub fn evaluate(&self, board: &Board) -> i32 {
        let key = board.get_hash();
        if let Some(hit) = self.cache.get(&key) {
            return *hit;
        }
        let score = evaluate_position(board);
        self.cache.insert(key, score);
        score
    }
}

impl Default for Evaluator {
    fn default() -> Self {
        Self::new()
    }
}

/// Uncached evaluation, side-to-move perspective.
pub fn evaluate_position(board: &Board) -> i32 {
    let phase = game_phase(board);
    let mut mg = 0;
    let mut eg = 0;

    for sq in *board.combined() {
        let piece = board.piece_on(sq).unwrap();
        let color = board.color_on(sq).unwrap();
        let sign = if color == Color::White { 1 } else { -1 };
        mg += sign * Pst::mg(piece, sq, color);
        eg += sign * Pst::eg(piece, sq, color);
    }

    for color in [Color::White, Color::Black] {
        let sign = if color == Color::White { 1 } else { -1 };
        let us = board.color_combined(color);
        let my_pawns = board.pieces(Piece::Pawn) & us;
        let their_pawns = board.pieces(Piece::Pawn) & board.color_combined(!color);

        if (board.pieces(Piece::Bishop) & us).popcnt() >= 2 {
            mg += sign * BISHOP_PAIR_MG;
            eg += sign * BISHOP_PAIR_EG;
        }

        let (doubled, isolated) = pawn_weaknesses(my_pawns);
        mg -= sign * (DOUBLED_MG * doubled + ISOLATED_MG * isolated);
        eg -= sign * (DOUBLED_EG * doubled + ISOLATED_EG * isolated);

        for sq in my_pawns {
            if their_pawns & front_span(sq, color) == EMPTY {
                let rank = relative_rank(sq, color);
                mg += sign * PASSED_MG[rank];
                eg += sign * PASSED_EG[rank];
            }
        }

        for sq in board.pieces(Piece::Knight) & us {
            let file = sq.get_file().to_index();
            let rank = sq.get_rank().to_index();
            if file == 0 || file == 7 || rank == 0 || rank == 7 {
                mg -= sign * KNIGHT_RIM_MG;
                eg -= sign * KNIGHT_RIM_EG;
            }
        }

        let my_rooks = board.pieces(Piece::Rook) & us;
        for sq in my_rooks {
            let file_bb = get_file(sq.get_file());
            if board.pieces(Piece::Pawn) & file_bb == EMPTY {
                mg += sign * ROOK_OPEN_MG;
                eg += sign * ROOK_OPEN_EG;
            } else if my_pawns & file_bb == EMPTY {
                mg += sign * ROOK_SEMI_MG;
                eg += sign * ROOK_SEMI_EG;
            }
        }
        if rooks_connected(my_rooks, *board.combined()) {
            mg += sign * ROOKS_CONNECTED;
            eg += sign * ROOKS_CONNECTED;
        }

        let (shield_mg, shield_eg) = king_shield(board, color, my_pawns);
        mg -= sign * shield_mg;
        eg -= sign * shield_eg;
    }

    let mobility_diff = mobility(board, Color::White) - mobility(board, Color::Black);
    mg += MOBILITY_MG * mobility_diff;
    eg += MOBILITY_EG * mobility_diff;

    let tempo = if board.side_to_move() == Color::White {
        TEMPO
    } else {
        -TEMPO
    };
    mg += tempo;
    eg += tempo;

    let score = (mg * phase + eg * (24 - phase)) / 24;
    if board.side_to_move() == Color::White {
        score
    } else {
        -score
    }
}

/// Game phase in 0-24: knights and bishops weigh 1, rooks 2, queens 4.
pub fn game_phase(board: &Board) -> i32 {
    let phase = board.pieces(Piece::Knight).popcnt()
        + board.pieces(Piece::Bishop).popcnt()
        + 2 * board.pieces(Piece::Rook).popcnt()
        + 4 * board.pieces(Piece::Queen).popcnt();
    (phase as i32).min(24)
}

/// Counts (doubled, isolated) pawns in `pawns`.
fn pawn_weaknesses(pawns: BitBoard) -> (i32, i32) {
    let mut doubled = 0;
    let mut isolated = 0;
    for f in 0..8 {
        let file = File::from_index(f);
        let on_file = (pawns & get_file(file)).popcnt() as i32;
        if on_file > 1 {
            doubled += on_file - 1;
        }
        if on_file > 0 && pawns & get_adjacent_files(file) == EMPTY {
            isolated += on_file;
        }
    }
    (doubled, isolated)
}

/// Squares on the pawn's file and adjacent files, strictly ahead of it.
fn front_span(sq: Square, color: Color) -> BitBoard {
    let files = get_file(sq.get_file()) | get_adjacent_files(sq.get_file());
    let rank = sq.get_rank().to_index();
    let mut ahead = EMPTY;
    match color {
        Color::White => {
            for r in rank + 1..8 {
                ahead |= get_rank(Rank::from_index(r));
            }
        }
        Color::Black => {
            for r in 0..rank {
                ahead |= get_rank(Rank::from_index(r));
            }
        }
    }
    files & ahead
}

fn relative_rank(sq: Square, color: Color) -> usize {
    let rank = sq.get_rank().to_index();
    match color {
        Color::White => rank,
        Color::Black => 7 - rank,
    }
}

/// The two rooks defend each other along a rank or file.
fn rooks_connected(rooks: BitBoard, occupancy: BitBoard) -> bool {
    if rooks.popcnt() != 2 {
        return false;
    }
    let mut iter = rooks;
    let first = iter.next().unwrap();
    let second = iter.next().unwrap();
    get_rook_moves(first, occupancy) & BitBoard::from_square(second) != EMPTY
}

/// Pawn-shield penalties (mg, eg) for the king's three files. A friendly
/// pawn one rank ahead shields fully, two ranks ahead partially.
fn king_shield(board: &Board, color: Color, my_pawns: BitBoard) -> (i32, i32) {
    let king = board.king_square(color);
    let king_file = king.get_file().to_index() as i32;
    let king_rank = king.get_rank().to_index() as i32;
    let forward = if color == Color::White { 1 } else { -1 };

    let mut mg = 0;
    let mut eg = 0;
    for df in -1..=1 {
        let file = king_file + df;
        if !(0..8).contains(&file) {
            mg += SHIELD_MISSING_MG;
            eg += SHIELD_MISSING_EG;
            continue;
        }
        if shield_pawn_at(my_pawns, file, king_rank + forward) {
            continue;
        }
        if shield_pawn_at(my_pawns, file, king_rank + 2 * forward) {
            mg += SHIELD_FAR_MG;
            eg += SHIELD_FAR_EG;
        } else {
            mg += SHIELD_MISSING_MG;
            eg += SHIELD_MISSING_EG;
        }
    }
    (mg, eg)
}

fn shield_pawn_at(pawns: BitBoard, file: i32, rank: i32) -> bool {
    if !(0..8).contains(&rank) {
        return false;
    }
    let sq = Square::make_square(Rank::from_index(rank as usize), File::from_index(file as usize));
    pawns & BitBoard::from_square(sq) != EMPTY
}

/// Pseudo-mobility of `color`: attacked squares outside its own pieces,
/// summed over knights, bishops, rooks and queens.
fn mobility(board: &Board, color: Color) -> i32 {
    let occupancy = *board.combined();
    let own = *board.color_combined(color);
    let free = !own;
    let mut count = 0;
    for sq in board.pieces(Piece::Knight) & own {
        count += (get_knight_moves(sq) & free).popcnt();
    }
    for sq in board.pieces(Piece::Bishop) & own {
        count += (get_bishop_moves(sq, occupancy) & free).popcnt();
    }
    for sq in board.pieces(Piece::Rook) & own {
        count += (get_rook_moves(sq, occupancy) & free).popcnt();
    }
    for sq in board.pieces(Piece::Queen) & own {
        count += ((get_bishop_moves(sq, occupancy) | get_rook_moves(sq, occupancy)) & free).popcnt();
    }
    count as i32
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn startpos_is_near_balanced() {
        let board = Board::default();
        let score = evaluate_position(&board);
        assert!(score.abs() <= 50, "startpos scored {score}");
    }

    #[test]
    fn cache_returns_computed_score() {
        let evaluator = Evaluator::new();
        let board = Board::default();
        let first = evaluator.evaluate(&board);
        assert_eq!(evaluator.cache_len(), 1);
        assert_eq!(evaluator.evaluate(&board), first);
    }

    #[test]
    fn phase_counts_major_material() {
        assert_eq!(game_phase(&Board::default()), 24);
        let bare = Board::from_str("4k3/8/8/8/8/8/8/4K3 w - - 0 1").unwrap();
        assert_eq!(game_phase(&bare), 0);
        let rook_each = Board::from_str("r3k3/8/8/8/8/8/8/R3K3 w - - 0 1").unwrap();
        assert_eq!(game_phase(&rook_each), 4);
    }

    #[test]
    fn passed_pawn_outscores_blocked_pawn() {
        // White e5 pawn is passed; in the second position a black e7 pawn
        // holds the file.
        let passed = Board::from_str("4k3/8/8/4P3/8/8/8/4K3 w - - 0 1").unwrap();
        let held = Board::from_str("4k3/4p3/8/4P3/8/8/8/4K3 w - - 0 1").unwrap();
        assert!(evaluate_position(&passed) > evaluate_position(&held));
    }

    #[test]
    fn doubled_isolated_counts() {
        // Three white pawns: doubled pair on e, isolated pawn on a.
        let board = Board::from_str("4k3/8/8/8/4P3/P3P3/8/4K3 w - - 0 1").unwrap();
        let us = board.color_combined(Color::White);
        let pawns = board.pieces(Piece::Pawn) & us;
        let (doubled, isolated) = pawn_weaknesses(pawns);
        assert_eq!(doubled, 1);
        assert_eq!(isolated, 3);
    }
}
