// src/search.rs
//
// Iterative-deepening negamax with aspiration windows, check extension,
// light late-move reduction and quiescence. Each searcher owns its
// transposition table, history and killers; the stop flag and evaluation
// cache are shared with the driver.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use chess::{Board, ChessMove, MoveGen};

use crate::eval::Evaluator;
use crate::ordering::{self, History, Killers};
use crate::score::{self, INF, MATE};
use crate::tt::{Bound, TranspositionTable};

pub const MAX_DEPTH: i32 = 64;

const ASPIRATION_WINDOW: i32 = 25;

#[derive(Clone, Copy, Debug)]
pub struct SearchLimits {
    pub time_ms: u64,
    pub depth: i32,
    pub infinite: bool,
}

impl Default for SearchLimits {
    fn default() -> Self {
        Self {
            time_ms: 1000,
            depth: 0,
            infinite: false,
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub struct SearchResult {
    pub best_move: Option<ChessMove>,
    pub best_score: i32,
}

pub struct Searcher {
    tt: TranspositionTable,
    history: History,
    killers: Killers,
    eval: Arc<Evaluator>,
    stop: Arc<AtomicBool>,
    limits: SearchLimits,
    start: Instant,
    nodes: u64,
}

impl Searcher {
    pub fn new(hash_mb: usize, eval: Arc<Evaluator>, stop: Arc<AtomicBool>) -> Self {
        Self {
            tt: TranspositionTable::new(hash_mb),
            history: History::new(),
            killers: Killers::new(),
            eval,
            stop,
            limits: SearchLimits::default(),
            start: Instant::now(),
            nodes: 0,
        }
    }

    /// Bump the TT generation and forget all per-game heuristic state.
    pub fn new_game(&mut self) {
        self.tt.new_generation();
        self.history.clear();
        self.killers.clear();
        self.eval.clear_cache();
    }

    pub fn resize_tt(&mut self, mb: usize) {
        self.tt.resize(mb.saturating_mul(1024 * 1024));
    }

    pub fn nodes(&self) -> u64 {
        self.nodes
    }

    /// Iterative deepening from `root`. Emits a UCI `info` line per
    /// completed depth and returns the last completed iteration's result.
    pub fn go(&mut self, root: &Board, limits: SearchLimits) -> SearchResult {
        self.limits = limits;
        self.nodes = 0;
        self.start = Instant::now();

        let root_moves: Vec<ChessMove> = MoveGen::new_legal(root).collect();
        if root_moves.is_empty() {
            return SearchResult {
                best_move: None,
                best_score: 0,
            };
        }

        let max_depth = if limits.depth > 0 {
            limits.depth.min(MAX_DEPTH)
        } else {
            MAX_DEPTH
        };

        let mut best = root_moves[0];
        let mut best_score = -INF;
        let mut prev_score = 0;

        for depth in 1..=max_depth {
            if self.time_up() {
                break;
            }

            // Aspiration window around the previous score; a mate score
            // invalidates the band, so fall back to the full window.
            let score = if depth > 1 && !score::is_mate_score(prev_score) {
                let alpha = prev_score - ASPIRATION_WINDOW;
                let beta = prev_score + ASPIRATION_WINDOW;
                let mut pos = *root;
                let narrow = self.negamax(&mut pos, depth, alpha, beta, 0);
                if !self.time_up() && (narrow <= alpha || narrow >= beta) {
                    let mut pos = *root;
                    self.negamax(&mut pos, depth, -INF, INF, 0)
                } else {
                    narrow
                }
            } else {
                let mut pos = *root;
                self.negamax(&mut pos, depth, -INF, INF, 0)
            };

            if self.time_up() {
                break;
            }

            let pv = self.extract_pv(root);
            if let Some(&first) = pv.first() {
                best = first;
            }
            best_score = score;
            prev_score = score;

            self.print_info(depth, score, &pv);
            log::debug!("depth {depth} score {score} nodes {}", self.nodes);
        }

        SearchResult {
            best_move: Some(best),
            best_score,
        }
    }

    fn print_info(&self, depth: i32, score: i32, pv: &[ChessMove]) {
        let elapsed = self.start.elapsed().as_millis();
        let score_str = if score::is_mate_score(score) {
            let moves = if score > 0 {
                (MATE - score + 1) / 2
            } else {
                -((MATE + score + 1) / 2)
            };
            format!("mate {moves}")
        } else {
            format!("cp {score}")
        };
        let pv_str = pv
            .iter()
            .map(|m| m.to_string())
            .collect::<Vec<_>>()
            .join(" ");
        println!(
            "info depth {depth} score {score_str} time {elapsed} nodes {} pv {pv_str}",
            self.nodes
        );
    }

    fn time_up(&self) -> bool {
        if self.stop.load(Ordering::Relaxed) {
            return true;
        }
        !self.limits.infinite && self.start.elapsed().as_millis() as u64 >= self.limits.time_ms
    }

    fn negamax(&mut self, board: &mut Board, depth: i32, mut alpha: i32, mut beta: i32, ply: i32) -> i32 {
        self.nodes += 1;
        if self.nodes & 2047 == 0 && self.time_up() {
            return self.eval.evaluate(board);
        }

        let alpha_orig = alpha;
        let key = board.get_hash();

        let mut tt_move = None;
        if let Some(entry) = self.tt.probe(key) {
            tt_move = entry.best_move();
            if entry.depth as i32 >= depth {
                let tt_score = score::from_tt(entry.score as i32, ply);
                match entry.bound {
                    Bound::Exact => return tt_score,
                    Bound::Lower => alpha = alpha.max(tt_score),
                    Bound::Upper => beta = beta.min(tt_score),
                }
                if alpha >= beta {
                    return tt_score;
                }
            }
        }

        if depth <= 0 {
            return self.qsearch(board, alpha, beta, ply);
        }

        let moves: Vec<ChessMove> = MoveGen::new_legal(board).collect();
        if moves.is_empty() {
            return if in_check(board) {
                -score::mate_score(ply)
            } else {
                0
            };
        }

        let mut depth = depth;
        if in_check(board) {
            depth += 1;
        }

        let ordered = self.order_moves(board, moves, tt_move, ply);

        let mut best_score = -INF;
        let mut best_move = None;
        let mut moves_searched = 0;

        for mv in ordered {
            let quiet = ordering::is_quiet(board, mv);

            // Light late-move reduction: no re-search on fail-high.
            let mut sub_depth = depth - 1;
            if sub_depth > 0 && moves_searched >= 4 && quiet {
                sub_depth -= 1;
            }

            let parent = *board;
            *board = board.make_move_new(mv);
            let sc = -self.negamax(board, sub_depth, -beta, -alpha, ply + 1);
            *board = parent;
            moves_searched += 1;

            if sc > best_score {
                best_score = sc;
                best_move = Some(mv);
            }
            if sc > alpha {
                alpha = sc;
                if quiet {
                    self.history.bonus(mv, (100 + depth * depth).min(2000));
                    self.killers.push(ply as usize, mv);
                }
            }
            if alpha >= beta {
                if quiet {
                    self.history.bonus(mv, (200 + depth * depth).min(4000));
                    self.killers.push(ply as usize, mv);
                }
                break;
            }
        }

        let bound = if best_score <= alpha_orig {
            Bound::Upper
        } else if best_score >= beta {
            Bound::Lower
        } else {
            Bound::Exact
        };
        self.tt
            .store(key, best_move, depth, score::to_tt(best_score, ply), bound);

        best_score
    }

    fn qsearch(&mut self, board: &mut Board, mut alpha: i32, beta: i32, ply: i32) -> i32 {
        self.nodes += 1;
        if self.nodes & 1023 == 0 && self.time_up() {
            return self.eval.evaluate(board);
        }

        // In check there is no stand-pat; every evasion is searched.
        if in_check(board) {
            let evasions: Vec<ChessMove> = MoveGen::new_legal(board).collect();
            if evasions.is_empty() {
                return -score::mate_score(ply);
            }
            let mut best = -INF;
            for mv in evasions {
                let parent = *board;
                *board = board.make_move_new(mv);
                let sc = -self.qsearch(board, -beta, -alpha, ply + 1);
                *board = parent;
                if sc > best {
                    best = sc;
                }
                if best > alpha {
                    alpha = best;
                }
                if alpha >= beta {
                    break;
                }
            }
            return best;
        }

        let stand = self.eval.evaluate(board);
        if stand >= beta {
            return stand;
        }
        if stand > alpha {
            alpha = stand;
        }

        let mut captures: Vec<ChessMove> = MoveGen::new_legal(board)
            .filter(|m| ordering::is_capture(board, *m) || m.get_promotion().is_some())
            .collect();
        if captures.is_empty() {
            return stand;
        }
        captures.sort_by_key(|m| std::cmp::Reverse(ordering::mvv_lva(board, *m)));

        let mut best = stand;
        for mv in captures {
            let parent = *board;
            *board = board.make_move_new(mv);
            let sc = -self.qsearch(board, -beta, -alpha, ply + 1);
            *board = parent;
            if sc > best {
                best = sc;
            }
            if best > alpha {
                alpha = best;
            }
            if alpha >= beta {
                break;
            }
        }
        best
    }

    /// Sort moves by TT move, captures (MVV-LVA), killers, then history.
    fn order_moves(
        &self,
        board: &Board,
        moves: Vec<ChessMove>,
        tt_move: Option<ChessMove>,
        ply: i32,
    ) -> Vec<ChessMove> {
        let mut scored: Vec<(ChessMove, i32)> = moves
            .into_iter()
            .map(|mv| {
                let score = if Some(mv) == tt_move {
                    ordering::TT_MOVE_SCORE
                } else if ordering::is_capture(board, mv) {
                    ordering::CAPTURE_SCORE + ordering::mvv_lva(board, mv)
                } else if self.killers.is_killer(ply as usize, mv) {
                    ordering::KILLER_SCORE
                } else {
                    ordering::QUIET_SCORE + self.history.score(mv)
                };
                (mv, score)
            })
            .collect();
        scored.sort_by(|a, b| b.1.cmp(&a.1));
        scored.into_iter().map(|(mv, _)| mv).collect()
    }

    /// Walk the TT from the root, following stored moves while they are
    /// legal. Overwritten entries may truncate the line; the 64-ply bound
    /// guards against cycles.
    fn extract_pv(&self, root: &Board) -> Vec<ChessMove> {
        let mut pv = Vec::new();
        let mut board = *root;
        for _ in 0..MAX_DEPTH {
            let Some(entry) = self.tt.probe(board.get_hash()) else {
                break;
            };
            let Some(mv) = entry.best_move() else {
                break;
            };
            if !board.legal(mv) {
                break;
            }
            pv.push(mv);
            board = board.make_move_new(mv);
        }
        pv
    }
}

#[inline]
fn in_check(board: &Board) -> bool {
    board.checkers().popcnt() > 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn searcher() -> Searcher {
        Searcher::new(
            8,
            Arc::new(Evaluator::new()),
            Arc::new(AtomicBool::new(false)),
        )
    }

    fn fixed_depth(depth: i32) -> SearchLimits {
        SearchLimits {
            time_ms: 30_000,
            depth,
            infinite: false,
        }
    }

    #[test]
    fn finds_back_rank_mate_in_one() {
        let board = Board::from_str("6k1/5ppp/8/8/8/8/5PPP/R5K1 w - - 0 1").unwrap();
        let mut s = searcher();
        let result = s.go(&board, fixed_depth(4));
        assert_eq!(result.best_move.unwrap().to_string(), "a1a8");
        assert!(score::is_mate_score(result.best_score));
        assert_eq!(result.best_score, score::mate_score(1));
    }

    #[test]
    fn no_moves_at_root_returns_none() {
        // Stalemate: black to move, no legal moves, not in check.
        let stalemate = Board::from_str("7k/5Q2/6K1/8/8/8/8/8 b - - 0 1").unwrap();
        let mut s = searcher();
        let result = s.go(&stalemate, fixed_depth(3));
        assert!(result.best_move.is_none());
        assert_eq!(result.best_score, 0);

        // Checkmated: black to move, in check, no legal moves.
        let mated = Board::from_str("R5k1/5ppp/8/8/8/8/8/6K1 b - - 0 1").unwrap();
        let result = s.go(&mated, fixed_depth(3));
        assert!(result.best_move.is_none());
    }

    #[test]
    fn startpos_depth_one_is_sane() {
        let board = Board::default();
        let mut s = searcher();
        let result = s.go(&board, fixed_depth(1));
        let mv = result.best_move.unwrap();
        assert!(board.legal(mv));
        assert!(result.best_score.abs() <= 50, "scored {}", result.best_score);
    }

    #[test]
    fn wins_a_hanging_queen() {
        // Black queen on d5 is undefended; Rd1xd5 is the only good move.
        let board = Board::from_str("4k3/8/8/3q4/8/8/8/3R2K1 w - - 0 1").unwrap();
        let mut s = searcher();
        let result = s.go(&board, fixed_depth(3));
        assert_eq!(result.best_move.unwrap().to_string(), "d1d5");
        assert!(result.best_score > 300, "scored {}", result.best_score);
    }

    #[test]
    fn tt_move_is_ordered_first() {
        let board = Board::default();
        let s = searcher();
        let moves: Vec<ChessMove> = MoveGen::new_legal(&board).collect();
        let hint = ChessMove::from_str("g1f3").unwrap();
        let ordered = s.order_moves(&board, moves, Some(hint), 0);
        assert_eq!(ordered[0], hint);
    }

    #[test]
    fn stop_flag_ends_infinite_search() {
        let stop = Arc::new(AtomicBool::new(true));
        let mut s = Searcher::new(8, Arc::new(Evaluator::new()), stop);
        let limits = SearchLimits {
            time_ms: 0,
            depth: 0,
            infinite: true,
        };
        // Pre-set stop flag: the search must return promptly with the
        // first-legal-move fallback.
        let result = s.go(&Board::default(), limits);
        assert!(result.best_move.is_some());
    }
}
