//! Background catalog pre-analysis
//!
//! Walks the song catalog and analyses everything not yet cached, on a
//! handful of worker threads. Run at startup, it means the operator's first
//! load of any catalog song is a cache hit instead of a multi-second wait.

use crate::cache::AnalysisCache;
use crate::catalog::song_list;
use crate::loader::SongLoader;
use crossbeam_channel::{unbounded, Receiver, Sender};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use tracing::{info, warn};

/// Progress updates emitted while scanning.
#[derive(Debug, Clone)]
pub enum ScanProgress {
    Started {
        total: usize,
    },
    /// A song was freshly analysed.
    Analyzed {
        current: usize,
        total: usize,
        path: PathBuf,
        bpm: f64,
    },
    /// Analysis failed; the song stays loadable only if it analyses later.
    Failed {
        current: usize,
        total: usize,
        path: PathBuf,
        message: String,
    },
    Complete {
        analyzed: usize,
        failed: usize,
    },
}

/// Pre-analyses a song directory into a shared cache.
pub struct LibraryScanner {
    cache_path: PathBuf,
    workers: usize,
}

impl LibraryScanner {
    pub fn new(cache_path: PathBuf) -> LibraryScanner {
        LibraryScanner {
            cache_path,
            workers: 2,
        }
    }

    pub fn with_workers(mut self, workers: usize) -> LibraryScanner {
        self.workers = workers.max(1);
        self
    }

    /// Scan `songs_dir` in the background. Returns the progress channel and
    /// the handle to join on.
    pub fn scan_async(&self, songs_dir: &Path) -> (Receiver<ScanProgress>, JoinHandle<()>) {
        let (tx, rx) = unbounded();
        let cache_path = self.cache_path.clone();
        let songs_dir = songs_dir.to_path_buf();
        let workers = self.workers;

        let handle = thread::spawn(move || {
            scan(&cache_path, &songs_dir, workers, &tx);
        });
        (rx, handle)
    }
}

fn scan(cache_path: &Path, songs_dir: &Path, workers: usize, tx: &Sender<ScanProgress>) {
    let files: Vec<PathBuf> = song_list(songs_dir).into_iter().map(|s| s.file).collect();
    let total = files.len();
    let _ = tx.send(ScanProgress::Started { total });
    if total == 0 {
        let _ = tx.send(ScanProgress::Complete {
            analyzed: 0,
            failed: 0,
        });
        return;
    }

    let queue = Arc::new(Mutex::new(files));
    let analyzed = Arc::new(Mutex::new(0usize));
    let failed = Arc::new(Mutex::new(0usize));
    let done = Arc::new(Mutex::new(0usize));

    let mut handles = Vec::new();
    for _ in 0..workers.min(total) {
        let queue = Arc::clone(&queue);
        let analyzed = Arc::clone(&analyzed);
        let failed = Arc::clone(&failed);
        let done = Arc::clone(&done);
        let tx = tx.clone();
        let cache_path = cache_path.to_path_buf();

        handles.push(thread::spawn(move || {
            // One cache connection per worker; SQLite serialises writes.
            let loader = match AnalysisCache::open(&cache_path) {
                Ok(cache) => SongLoader::with_cache(cache),
                Err(e) => {
                    warn!(error = %e, "scanner running without cache");
                    SongLoader::new()
                }
            };

            loop {
                let path = {
                    let mut queue = queue.lock().unwrap();
                    queue.pop()
                };
                let Some(path) = path else {
                    break;
                };

                let current = {
                    let mut done = done.lock().unwrap();
                    *done += 1;
                    *done
                };

                match loader.load(&path) {
                    Ok(song) => {
                        *analyzed.lock().unwrap() += 1;
                        let _ = tx.send(ScanProgress::Analyzed {
                            current,
                            total,
                            path,
                            bpm: song.bpm,
                        });
                    }
                    Err(e) => {
                        *failed.lock().unwrap() += 1;
                        warn!(file = %path.display(), error = %e, "scan failed");
                        let _ = tx.send(ScanProgress::Failed {
                            current,
                            total,
                            path,
                            message: e.to_string(),
                        });
                    }
                }
            }
        }));
    }

    for handle in handles {
        let _ = handle.join();
    }

    let analyzed = *analyzed.lock().unwrap();
    let failed = *failed.lock().unwrap();
    info!(analyzed, failed, "catalog scan complete");
    let _ = tx.send(ScanProgress::Complete { analyzed, failed });
}
