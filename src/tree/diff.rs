//! Computes the ordered patch that turns one file tree state into another.
//!
//! The patch is always safe to apply strictly left to right:
//!
//! - no create (or move target) appears before the creation of its parent
//!   directory;
//! - no directory removal appears before the removal of everything beneath it.
//!
//! Operations are emitted in three phases. Files and type-changed subtrees
//! are removed first, deepest paths first. Creates, updates and moves follow
//! in ascending tree order. Directories that simply disappeared are removed
//! last, again deepest first, so that a move out of a vanished directory
//! still lands before that directory's removal.

use crate::tree::entry::{PathEntry, compare_paths, is_ancestor};
use std::borrow::Cow;
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};

/// One unit of reconciliation work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeOperation {
    CreateDirectory(PathEntry),
    CreateFile(PathEntry),
    Update(PathEntry),
    Remove { path: String, is_directory: bool },
    /// A file that disappeared at `from` and reappeared unchanged at
    /// `entry.relative_path`.
    Move { from: String, entry: PathEntry },
}

impl ChangeOperation {
    /// The path the operation applies to (the destination for moves).
    pub fn path(&self) -> &str {
        match self {
            ChangeOperation::CreateDirectory(entry)
            | ChangeOperation::CreateFile(entry)
            | ChangeOperation::Update(entry)
            | ChangeOperation::Move { entry, .. } => &entry.relative_path,
            ChangeOperation::Remove { path, .. } => path,
        }
    }

    /// The scanned metadata, absent for removals.
    pub fn entry(&self) -> Option<&PathEntry> {
        match self {
            ChangeOperation::CreateDirectory(entry)
            | ChangeOperation::CreateFile(entry)
            | ChangeOperation::Update(entry)
            | ChangeOperation::Move { entry, .. } => Some(entry),
            ChangeOperation::Remove { .. } => None,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ChangeOperation::CreateDirectory(_) => "mkdir",
            ChangeOperation::CreateFile(_) => "create",
            ChangeOperation::Update(_) => "update",
            ChangeOperation::Remove { .. } => "unlink",
            ChangeOperation::Move { .. } => "move",
        }
    }

    fn create(entry: &PathEntry) -> Self {
        if entry.is_directory {
            ChangeOperation::CreateDirectory(entry.clone())
        } else {
            ChangeOperation::CreateFile(entry.clone())
        }
    }
}

#[derive(Debug, Clone)]
pub struct DiffOptions {
    /// Pair unambiguous remove/create couples into [`ChangeOperation::Move`].
    pub detect_moves: bool,
}

impl Default for DiffOptions {
    fn default() -> Self {
        Self { detect_moves: true }
    }
}

/// Diffs two tree states with default options.
pub fn diff(previous: &[PathEntry], current: &[PathEntry]) -> Vec<ChangeOperation> {
    diff_with_options(previous, current, &DiffOptions::default())
}

/// Diffs two tree states.
///
/// Both inputs are expected in tree order (see [`compare_paths`]); unsorted
/// input is sorted first rather than producing a wrong patch.
pub fn diff_with_options(
    previous: &[PathEntry],
    current: &[PathEntry],
    options: &DiffOptions,
) -> Vec<ChangeOperation> {
    let previous = tree_ordered(previous);
    let current = tree_ordered(current);

    let mut removed: Vec<&PathEntry> = Vec::new();
    let mut type_changed: Vec<&str> = Vec::new();
    let mut forward: Vec<ChangeOperation> = Vec::new();

    let (mut i, mut j) = (0, 0);
    loop {
        let order = match (previous.get(i), current.get(j)) {
            (None, None) => break,
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (Some(p), Some(c)) => compare_paths(&p.relative_path, &c.relative_path),
        };

        match order {
            Ordering::Less => {
                removed.push(&previous[i]);
                i += 1;
            }
            Ordering::Greater => {
                forward.push(ChangeOperation::create(&current[j]));
                j += 1;
            }
            Ordering::Equal => {
                let (p, c) = (&previous[i], &current[j]);
                if p.is_directory != c.is_directory {
                    removed.push(p);
                    type_changed.push(&p.relative_path);
                    forward.push(ChangeOperation::create(c));
                } else if !p.same_content_metadata(c) {
                    forward.push(ChangeOperation::Update(c.clone()));
                }
                i += 1;
                j += 1;
            }
        }
    }

    let in_type_change =
        |path: &str| type_changed.iter().any(|t| *t == path || is_ancestor(t, path));

    let moves = if options.detect_moves {
        pair_moves(&removed, &forward, &in_type_change)
    } else {
        HashMap::new()
    };
    let move_sources: HashSet<&str> = moves.values().map(|from| from.as_str()).collect();

    let mut ops = Vec::with_capacity(removed.len() + forward.len());
    let mut deferred_dirs = Vec::new();

    for entry in removed.iter().rev() {
        let path = entry.relative_path.as_str();
        if move_sources.contains(path) {
            continue;
        }
        if entry.is_directory && !in_type_change(path) {
            deferred_dirs.push(path);
            continue;
        }
        ops.push(ChangeOperation::Remove {
            path: path.to_string(),
            is_directory: entry.is_directory,
        });
    }

    for op in forward {
        match op {
            ChangeOperation::CreateFile(entry) => match moves.get(entry.relative_path.as_str()) {
                Some(from) => ops.push(ChangeOperation::Move {
                    from: from.clone(),
                    entry,
                }),
                None => ops.push(ChangeOperation::CreateFile(entry)),
            },
            other => ops.push(other),
        }
    }

    for path in deferred_dirs {
        ops.push(ChangeOperation::Remove {
            path: path.to_string(),
            is_directory: true,
        });
    }

    ops
}

/// Matches removed files to created files by (size, mtime, mode).
///
/// A pair is only formed when the key identifies exactly one removed and
/// exactly one created file. Returns target path -> source path.
fn pair_moves(
    removed: &[&PathEntry],
    forward: &[ChangeOperation],
    in_type_change: &dyn Fn(&str) -> bool,
) -> HashMap<String, String> {
    let mut sources: HashMap<MoveKey, Vec<&PathEntry>> = HashMap::new();
    for &entry in removed {
        if !entry.is_directory && !in_type_change(&entry.relative_path) {
            sources.entry(move_key(entry)).or_default().push(entry);
        }
    }

    let mut targets: HashMap<MoveKey, Vec<&PathEntry>> = HashMap::new();
    for op in forward {
        if let ChangeOperation::CreateFile(entry) = op {
            targets.entry(move_key(entry)).or_default().push(entry);
        }
    }

    let mut moves = HashMap::new();
    for (k, found) in &targets {
        if let ([target], Some([source])) = (found.as_slice(), sources.get(k).map(Vec::as_slice)) {
            moves.insert(target.relative_path.clone(), source.relative_path.clone());
        }
    }
    moves
}

type MoveKey = (u64, i64, u32);

fn move_key(entry: &PathEntry) -> MoveKey {
    (entry.size, entry.mtime, entry.mode)
}

fn tree_ordered(entries: &[PathEntry]) -> Cow<'_, [PathEntry]> {
    let sorted = entries
        .windows(2)
        .all(|w| compare_paths(&w[0].relative_path, &w[1].relative_path) == Ordering::Less);
    if sorted {
        Cow::Borrowed(entries)
    } else {
        let mut owned = entries.to_vec();
        crate::tree::entry::sort_entries(&mut owned);
        Cow::Owned(owned)
    }
}

/// Checks that `ops` can be applied left to right without touching a path
/// whose parent has not been created yet, or removing a directory that still
/// has tracked contents. Returns the first offending path.
pub fn verify_order(ops: &[ChangeOperation]) -> Result<(), String> {
    let created_dirs: HashMap<&str, usize> = ops
        .iter()
        .enumerate()
        .filter_map(|(i, op)| match op {
            ChangeOperation::CreateDirectory(e) => Some((e.relative_path.as_str(), i)),
            _ => None,
        })
        .collect();

    for (i, op) in ops.iter().enumerate() {
        if op.entry().is_some() && !matches!(op, ChangeOperation::Update(_)) {
            let path = op.path();
            for (dir, &at) in &created_dirs {
                if is_ancestor(dir, path) && at > i {
                    return Err(format!("{path} created before parent {dir}"));
                }
            }
        }

        if let ChangeOperation::Remove {
            path,
            is_directory: true,
        } = op
        {
            let later = ops[i + 1..].iter().find_map(|later| match later {
                ChangeOperation::Remove { path: p, .. } if is_ancestor(path, p) => Some(p.as_str()),
                ChangeOperation::Move { from, .. } if is_ancestor(path, from) => {
                    Some(from.as_str())
                }
                _ => None,
            });
            if let Some(child) = later {
                return Err(format!("{path} removed before descendant {child}"));
            }
        }
    }
    Ok(())
}
