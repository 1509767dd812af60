//! `diffstat(1)`-style summaries of unified diffs.

use patch::{Line, Patch};
use thiserror::Error;

/// Total width the histogram lines are fit into.
const LINE_WIDTH: usize = 80;

#[derive(Debug, Error, PartialEq, Eq)]
#[error("parsing diff: {0}")]
pub struct DiffstatError(String);

struct FileStat {
	name: String,
	insertions: usize,
	deletions: usize,
}

impl FileStat {
	fn from_patch(patch: &Patch<'_>) -> Self {
		let path: &str = if patch.new.path == "/dev/null" {
			&patch.old.path
		} else {
			&patch.new.path
		};
		let name = path
			.strip_prefix("a/")
			.or_else(|| path.strip_prefix("b/"))
			.unwrap_or(path)
			.to_string();

		let (mut insertions, mut deletions) = (0, 0);
		for line in patch.hunks.iter().flat_map(|h| &h.lines) {
			match line {
				Line::Add(_) => insertions += 1,
				Line::Remove(_) => deletions += 1,
				Line::Context(_) => {}
			}
		}

		Self {
			name,
			insertions,
			deletions,
		}
	}

	fn changes(&self) -> usize {
		self.insertions + self.deletions
	}
}

/// Old and new line counts of a `@@ -l,s +l,s @@` hunk header.
fn hunk_lengths(header: &str) -> Option<(usize, usize)> {
	let range_len = |range: &str| match range.split_once(',') {
		Some((_, len)) => len.parse().ok(),
		None => Some(1),
	};
	let mut ranges = header.strip_prefix("@@ ")?.split(' ');
	let old = range_len(ranges.next()?.strip_prefix('-')?)?;
	let new = range_len(ranges.next()?.strip_prefix('+')?)?;
	Some((old, new))
}

/// Split a multi-file diff at its `---`/`+++` header pairs.
///
/// Hunk bodies are skipped by their line counts, so changed lines that look
/// like headers (`--- x` removed, `+++ y` added) stay in their file.
fn split_files(diff: &str) -> Vec<&str> {
	let mut starts = Vec::new();
	let mut offset = 0;
	let (mut old_left, mut new_left) = (0usize, 0usize);
	let mut lines = diff.split_inclusive('\n').peekable();
	while let Some(line) = lines.next() {
		if old_left > 0 || new_left > 0 {
			match line.as_bytes().first() {
				Some(b' ') => {
					old_left = old_left.saturating_sub(1);
					new_left = new_left.saturating_sub(1);
				}
				Some(b'-') => old_left = old_left.saturating_sub(1),
				Some(b'+') => new_left = new_left.saturating_sub(1),
				_ => {}
			}
		} else if line.starts_with("@@ ") {
			(old_left, new_left) = hunk_lengths(line).unwrap_or_default();
		} else if line.starts_with("--- ") && lines.peek().is_some_and(|next| next.starts_with("+++ ")) {
			starts.push(offset);
		}
		offset += line.len();
	}

	starts
		.iter()
		.enumerate()
		.map(|(i, &start)| &diff[start..starts.get(i + 1).copied().unwrap_or(diff.len())])
		.collect()
}

fn plural(n: usize, singular: &str, plural: &str) -> String {
	format!("{} {}", n, if n == 1 { singular } else { plural })
}

/// Summarize a unified diff as a histogram of insertions and deletions per file.
///
/// ```text
///  apps.v1.Deployment.default.api |    4 ++--
///  v1.ConfigMap.default.settings  |    2 ++
///  2 files changed, 4 insertions(+), 2 deletions(-)
/// ```
pub fn diffstat(diff: &str) -> Result<String, DiffstatError> {
	let stats = split_files(diff)
		.into_iter()
		.map(|file| {
			Patch::from_single(file)
				.map(|patch| FileStat::from_patch(&patch))
				.map_err(|e| DiffstatError(e.to_string()))
		})
		.collect::<Result<Vec<_>, _>>()?;

	let name_width = stats.iter().map(|s| s.name.len()).max().unwrap_or(0);
	let max_changes = stats.iter().map(FileStat::changes).max().unwrap_or(0);
	let count_width = max_changes.to_string().len().max(4);
	let graph_width = LINE_WIDTH
		.saturating_sub(name_width + count_width + 5)
		.max(10);

	let mut out = String::new();
	for stat in &stats {
		let changes = stat.changes();
		let (plus, minus) = if max_changes > graph_width {
			let scaled = (changes * graph_width).div_ceil(max_changes).max(1);
			let plus = (stat.insertions * scaled + changes / 2) / changes.max(1);
			(plus, scaled - plus)
		} else {
			(stat.insertions, stat.deletions)
		};
		out.push_str(&format!(
			" {:<name_width$} | {:>count_width$} {}{}\n",
			stat.name,
			changes,
			"+".repeat(plus),
			"-".repeat(minus),
		));
	}

	let insertions: usize = stats.iter().map(|s| s.insertions).sum();
	let deletions: usize = stats.iter().map(|s| s.deletions).sum();
	out.push_str(&format!(
		" {}, {}, {}\n",
		plural(stats.len(), "file changed", "files changed"),
		plural(insertions, "insertion(+)", "insertions(+)"),
		plural(deletions, "deletion(-)", "deletions(-)"),
	));

	Ok(out)
}

#[cfg(test)]
mod tests {
	use indoc::indoc;

	use super::*;

	#[test]
	fn test_diffstat() {
		let diff = indoc! {"
			--- a/apps.v1.Deployment.default.api
			+++ b/apps.v1.Deployment.default.api
			@@ -1,4 +1,4 @@
			 spec:
			-  replicas: 1
			-  paused: true
			+  replicas: 3
			+  paused: false
			 status: {}
			--- /dev/null
			+++ b/v1.ConfigMap.default.settings
			@@ -0,0 +1,2 @@
			+data:
			+  key: value
		"};

		assert_eq!(
			diffstat(diff).unwrap(),
			indoc! {"
				 apps.v1.Deployment.default.api |    4 ++--
				 v1.ConfigMap.default.settings  |    2 ++
				 2 files changed, 4 insertions(+), 2 deletions(-)
			"}
		);
	}

	#[test]
	fn test_diffstat_singular() {
		let diff = indoc! {"
			--- a/v1.ConfigMap.default.c
			+++ b/v1.ConfigMap.default.c
			@@ -1,1 +1,1 @@
			-a
			+b
		"};

		assert_eq!(
			diffstat(diff).unwrap(),
			indoc! {"
				 v1.ConfigMap.default.c |    2 +-
				 1 file changed, 1 insertion(+), 1 deletion(-)
			"}
		);
	}

	#[test]
	fn test_diffstat_scales_wide_changes() {
		let mut diff = String::from("--- /dev/null\n+++ b/v1.ConfigMap.default.big\n@@ -0,0 +1,200 @@\n");
		for i in 0..200 {
			diff.push_str(&format!("+line {}\n", i));
		}

		let out = diffstat(&diff).unwrap();
		let first = out.lines().next().unwrap();
		assert!(first.len() <= LINE_WIDTH, "{first}");
		assert!(first.contains(" 200 +"));
		assert!(out.ends_with(" 1 file changed, 200 insertions(+), 0 deletions(-)\n"));
	}

	#[test]
	fn test_split_files() {
		let diff = "--- a/x\n+++ b/x\n@@ -1,1 +1,1 @@\n-a\n+b\n--- a/y\n+++ b/y\n@@ -1,1 +1,1 @@\n-c\n+d\n";
		assert_eq!(
			split_files(diff),
			vec![
				"--- a/x\n+++ b/x\n@@ -1,1 +1,1 @@\n-a\n+b\n",
				"--- a/y\n+++ b/y\n@@ -1,1 +1,1 @@\n-c\n+d\n",
			]
		);
		assert!(split_files("").is_empty());
	}

	#[test]
	fn test_split_files_header_lookalikes_in_hunk() {
		// a removed "-- old" line followed by an added "++ new" line
		let diff = indoc! {"
			--- a/v1.ConfigMap.default.c
			+++ b/v1.ConfigMap.default.c
			@@ -1,3 +1,3 @@
			 data:
			--- old
			+++ new
			 kind: ConfigMap
			--- a/v1.ConfigMap.default.d
			+++ b/v1.ConfigMap.default.d
			@@ -1 +1 @@
			-a
			+b
		"};

		let files = split_files(diff);
		assert_eq!(files.len(), 2);
		assert!(files[0].ends_with(" kind: ConfigMap\n"));
		assert!(files[1].starts_with("--- a/v1.ConfigMap.default.d\n"));
	}

	#[test]
	fn test_hunk_lengths() {
		assert_eq!(hunk_lengths("@@ -1,4 +1,5 @@\n"), Some((4, 5)));
		assert_eq!(hunk_lengths("@@ -0,0 +1 @@ data:\n"), Some((0, 1)));
		assert_eq!(hunk_lengths("@@ garbage\n"), None);
	}

	#[test]
	fn test_diffstat_invalid() {
		assert!(diffstat("--- a/x\n+++ b/x\n@@ garbage\n").is_err());
	}

	#[test]
	fn test_diffstat_empty() {
		assert_eq!(
			diffstat("").unwrap(),
			" 0 files changed, 0 insertions(+), 0 deletions(-)\n"
		);
	}
}
