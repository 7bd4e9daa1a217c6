// src/uci.rs
//
// UCI protocol driver. Owns the current position and a pool of searchers;
// `go` hands a snapshot of the board to one worker thread per searcher and
// a dispatcher joins them so the command loop stays responsive.

use std::io::{self, BufRead};
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use anyhow::Result;
use chess::{Board, ChessMove, File, MoveGen, Piece, Rank, Square};
use parking_lot::Mutex;

use crate::eval::Evaluator;
use crate::search::{SearchLimits, SearchResult, Searcher};
use crate::tt::DEFAULT_HASH_MB;

const ENGINE_NAME: &str = "Halcyon 0.3";
const ENGINE_AUTHOR: &str = "the Halcyon developers";

pub struct UciDriver {
    board: Board,
    searchers: Vec<Arc<Mutex<Searcher>>>,
    eval: Arc<Evaluator>,
    stop: Arc<AtomicBool>,
    dispatcher: Option<JoinHandle<()>>,
    threads: usize,
    hash_mb: usize,
}

impl UciDriver {
    pub fn new() -> Result<Self> {
        let eval = Arc::new(Evaluator::new());
        let stop = Arc::new(AtomicBool::new(false));
        let mut driver = Self {
            board: Board::default(),
            searchers: Vec::new(),
            eval,
            stop,
            dispatcher: None,
            threads: 1,
            hash_mb: DEFAULT_HASH_MB,
        };
        driver.ensure_pool();
        Ok(driver)
    }

    /// Read commands from stdin until `quit` or EOF.
    pub fn run(&mut self) -> Result<()> {
        let stdin = io::stdin();
        for line in stdin.lock().lines() {
            let Ok(line) = line else { break };
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            if !self.handle_command(line) {
                break;
            }
        }
        self.cancel_search();
        Ok(())
    }

    /// Dispatch one command line. Returns false when the loop should exit.
    pub fn handle_command(&mut self, command: &str) -> bool {
        let parts: Vec<&str> = command.split_whitespace().collect();
        match parts.first().copied() {
            Some("uci") => {
                println!("id name {ENGINE_NAME}");
                println!("id author {ENGINE_AUTHOR}");
                println!("option name Hash type spin default {DEFAULT_HASH_MB} min 1 max 4096");
                println!("option name Threads type spin default 1 min 1 max 256");
                println!("uciok");
            }
            Some("isready") => println!("readyok"),
            Some("ucinewgame") => self.cmd_new_game(),
            Some("setoption") => self.cmd_setoption(&parts[1..]),
            Some("position") => self.cmd_position(&parts[1..]),
            Some("go") => self.cmd_go(&parts[1..]),
            Some("stop") => {
                self.stop.store(true, Ordering::SeqCst);
            }
            Some("quit") => return false,
            Some("d") | Some("print") => {
                println!("info string FEN {}", self.board);
            }
            Some("bench") => self.cmd_bench(),
            Some("eval") => {
                let score = self.eval.evaluate(&self.board);
                println!("info string static eval {score} cp");
            }
            _ => {} // Ignore unknown commands
        }
        true
    }

    fn cmd_new_game(&mut self) {
        self.cancel_search();
        for searcher in &self.searchers {
            searcher.lock().new_game();
        }
    }

    fn cmd_setoption(&mut self, parts: &[&str]) {
        // "setoption name <tokens...> [value <v>]"; option names may
        // contain spaces, so everything between the keywords is the name.
        let Some(("name", rest)) = parts.split_first().map(|(head, rest)| (*head, rest)) else {
            return;
        };
        let mut halves = rest.splitn(2, |&tok| tok == "value");
        let name = halves.next().unwrap_or_default().join(" ");
        let value = halves
            .next()
            .and_then(|tokens| tokens.first())
            .copied()
            .unwrap_or("");

        match name.as_str() {
            "Threads" => {
                let threads = value.parse::<usize>().unwrap_or(1).max(1);
                self.cancel_search();
                self.threads = threads;
                self.ensure_pool();
                log::debug!("worker pool resized to {threads}");
            }
            "Hash" => {
                if let Ok(mb) = value.parse::<usize>() {
                    let mb = mb.max(1);
                    self.cancel_search();
                    self.hash_mb = mb;
                    for searcher in &self.searchers {
                        searcher.lock().resize_tt(mb);
                    }
                    log::debug!("hash resized to {mb} MB");
                }
            }
            _ => {} // Other options are accepted silently
        }
    }

    fn cmd_position(&mut self, parts: &[&str]) {
        self.cancel_search();

        let mut index = 0;
        match parts.first().copied() {
            Some("startpos") => {
                self.board = Board::default();
                index = 1;
            }
            Some("fen") => {
                let fen_parts: Vec<&str> = parts
                    .iter()
                    .skip(1)
                    .take_while(|&&p| p != "moves")
                    .copied()
                    .collect();
                index = 1 + fen_parts.len();
                let fen = fen_parts.join(" ");
                match Board::from_str(&fen) {
                    Ok(board) => self.board = board,
                    Err(_) => return,
                }
            }
            _ => return,
        }

        if parts.get(index).copied() == Some("moves") {
            for token in &parts[index + 1..] {
                let Some(mv) = uci_to_move(&self.board, token) else {
                    break;
                };
                self.board = self.board.make_move_new(mv);
            }
        }
    }

    fn cmd_go(&mut self, parts: &[&str]) {
        self.cancel_search();
        let limits = self.parse_limits(parts);
        log::debug!(
            "go: time {} ms, depth {}, infinite {}",
            limits.time_ms,
            limits.depth,
            limits.infinite
        );

        self.stop.store(false, Ordering::SeqCst);
        self.ensure_pool();

        let searchers = self.searchers.clone();
        let board = self.board;

        self.dispatcher = Some(thread::spawn(move || {
            let mut workers = Vec::with_capacity(searchers.len());
            for searcher in searchers {
                workers.push(thread::spawn(move || searcher.lock().go(&board, limits)));
            }
            let results: Vec<SearchResult> =
                workers.into_iter().filter_map(|w| w.join().ok()).collect();

            let best = results
                .into_iter()
                .max_by_key(|r| r.best_score)
                .and_then(|r| r.best_move)
                .or_else(|| MoveGen::new_legal(&board).next());

            match best {
                Some(mv) => println!("bestmove {mv}"),
                None => println!("bestmove 0000"),
            }
        }));
    }

    /// Fixed-position benchmark, searched at a fixed depth.
    fn cmd_bench(&mut self) {
        self.cancel_search();
        self.stop.store(false, Ordering::SeqCst);

        let positions = [
            "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1",
            "r3k2r/p1ppqpb1/bn2pnp1/3PN3/1p2P3/2N2Q1p/PPPBBPPP/R3K2R w KQkq - 0 1",
            "8/2p5/3p4/KP5r/1R3p1k/8/4P1P1/8 w - - 0 1",
            "r3k2r/Pppp1ppp/1b3nbN/nP6/BBP1P3/q4N2/Pp1P2PP/R2Q1RK1 w kq - 0 1",
            "rnbq1k1r/pp1Pbppp/2p5/8/2B5/8/PPP1NnPP/RNBQK2R w KQ - 1 8",
        ];
        let limits = SearchLimits {
            time_ms: 30_000,
            depth: 6,
            infinite: false,
        };

        let start = std::time::Instant::now();
        let mut total_nodes = 0u64;
        for fen in positions {
            let board = Board::from_str(fen).expect("bench FEN is valid");
            let mut searcher = self.searchers[0].lock();
            searcher.go(&board, limits);
            total_nodes += searcher.nodes();
        }
        let elapsed = start.elapsed().as_secs_f64();
        let nps = if elapsed > 0.0 {
            (total_nodes as f64 / elapsed) as u64
        } else {
            0
        };
        println!("info string bench: {} positions", positions.len());
        println!("info string bench: {total_nodes} nodes, {nps} nps");
    }

    fn parse_limits(&self, parts: &[&str]) -> SearchLimits {
        let mut wtime: i64 = -1;
        let mut btime: i64 = -1;
        let mut winc: i64 = 0;
        let mut binc: i64 = 0;
        let mut movestogo: i64 = -1;
        let mut movetime: i64 = -1;
        let mut depth: i32 = -1;
        let mut infinite = false;

        let mut i = 0;
        while i < parts.len() {
            let arg = |i: usize| parts.get(i + 1).and_then(|s| s.parse().ok());
            match parts[i] {
                "wtime" => {
                    wtime = arg(i).unwrap_or(wtime);
                    i += 2;
                }
                "btime" => {
                    btime = arg(i).unwrap_or(btime);
                    i += 2;
                }
                "winc" => {
                    winc = arg(i).unwrap_or(winc);
                    i += 2;
                }
                "binc" => {
                    binc = arg(i).unwrap_or(binc);
                    i += 2;
                }
                "movestogo" => {
                    movestogo = arg(i).unwrap_or(movestogo);
                    i += 2;
                }
                "movetime" => {
                    movetime = arg(i).unwrap_or(movetime);
                    i += 2;
                }
                "depth" => {
                    depth = parts.get(i + 1).and_then(|s| s.parse().ok()).unwrap_or(depth);
                    i += 2;
                }
                "infinite" => {
                    infinite = true;
                    i += 1;
                }
                _ => i += 1,
            }
        }

        if infinite {
            return SearchLimits {
                time_ms: u64::MAX,
                depth: 0,
                infinite: true,
            };
        }
        if movetime > 0 {
            return SearchLimits {
                time_ms: movetime as u64,
                depth: 0,
                infinite: false,
            };
        }
        if depth > 0 {
            return SearchLimits {
                time_ms: 30_000,
                depth,
                infinite: false,
            };
        }

        let white_to_move = self.board.side_to_move() == chess::Color::White;
        let my_time = if white_to_move { wtime } else { btime };
        let my_inc = if white_to_move { winc } else { binc };

        let time_ms = if my_time >= 0 {
            let mtg = if movestogo > 0 { movestogo } else { 30 };
            let slice = my_time / mtg.max(1);
            let budget = slice + my_inc / 2;
            budget.clamp(20, (my_time - 10).max(50)) as u64
        } else {
            500
        };
        SearchLimits {
            time_ms,
            depth: 0,
            infinite: false,
        }
    }

    /// Grow or shrink the searcher pool to `threads` entries.
    fn ensure_pool(&mut self) {
        while self.searchers.len() < self.threads {
            self.searchers.push(Arc::new(Mutex::new(Searcher::new(
                self.hash_mb,
                Arc::clone(&self.eval),
                Arc::clone(&self.stop),
            ))));
        }
        self.searchers.truncate(self.threads);
    }

    /// Stop any in-flight search and wait for the dispatcher to finish.
    fn cancel_search(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.dispatcher.take() {
            let _ = handle.join();
        }
    }

    #[cfg(test)]
    fn board(&self) -> &Board {
        &self.board
    }
}

/// Resolve a coordinate-notation token against the legal moves of `board`.
pub fn uci_to_move(board: &Board, token: &str) -> Option<ChessMove> {
    if token.len() < 4 || !token.is_ascii() {
        return None;
    }
    let from = parse_square(&token.as_bytes()[0..2])?;
    let to = parse_square(&token.as_bytes()[2..4])?;
    let promotion = token.chars().nth(4).map(|c| match c.to_ascii_lowercase() {
        'n' => Piece::Knight,
        'b' => Piece::Bishop,
        'r' => Piece::Rook,
        _ => Piece::Queen,
    });

    MoveGen::new_legal(board).find(|m| {
        m.get_source() == from && m.get_dest() == to && m.get_promotion() == promotion
    })
}

fn parse_square(bytes: &[u8]) -> Option<Square> {
    let file = bytes[0].wrapping_sub(b'a') as usize;
    let rank = bytes[1].wrapping_sub(b'1') as usize;
    if file > 7 || rank > 7 {
        return None;
    }
    Some(Square::make_square(
        Rank::from_index(rank),
        File::from_index(file),
    ))
}
