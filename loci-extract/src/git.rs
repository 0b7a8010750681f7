use std::path::Path;

/// Subjects of the most recent commits that touched `path`, newest first,
/// prefixed with a `[git history]` header line.
///
/// Returns `None` when the file is outside a working tree or git resolution
/// fails for any reason; history is enrichment, never a requirement.
pub fn recent_commit_subjects(path: &Path, limit: usize) -> Option<String> {
    let repo = git2::Repository::discover(path.parent()?).ok()?;
    let workdir = repo.workdir()?;
    let relative = path.strip_prefix(workdir).ok()?;

    let mut revwalk = repo.revwalk().ok()?;
    revwalk.push_head().ok()?;
    revwalk.set_sorting(git2::Sort::TIME).ok()?;

    let mut diff_options = git2::DiffOptions::new();
    diff_options.pathspec(relative);

    let mut subjects = Vec::new();
    for oid in revwalk.flatten() {
        if subjects.len() >= limit {
            break;
        }
        let Ok(commit) = repo.find_commit(oid) else {
            continue;
        };
        let Ok(tree) = commit.tree() else { continue };
        let parent_tree = commit.parent(0).ok().and_then(|p| p.tree().ok());

        let Ok(diff) =
            repo.diff_tree_to_tree(parent_tree.as_ref(), Some(&tree), Some(&mut diff_options))
        else {
            continue;
        };
        if diff.deltas().len() == 0 {
            continue;
        }
        if let Some(subject) = commit.summary() {
            let subject = subject.trim();
            if !subject.is_empty() {
                subjects.push(subject.to_string());
            }
        }
    }

    if subjects.is_empty() {
        None
    } else {
        Some(format!("[git history]\n{}", subjects.join("\n")))
    }
}
