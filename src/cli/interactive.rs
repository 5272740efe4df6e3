use std::io::{self, BufRead, Write};

use anyhow::{Result, anyhow};

use crate::core::Issue;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Selection {
    All,
    None,
    Indices(Vec<usize>),
}

impl Selection {
    /// The chosen issues, in the order they were offered.
    pub(crate) fn pick(&self, offered: &[Issue]) -> Vec<Issue> {
        match self {
            Selection::All => offered.to_vec(),
            Selection::None => Vec::new(),
            Selection::Indices(indices) => indices
                .iter()
                .filter_map(|&i| offered.get(i).cloned())
                .collect(),
        }
    }
}

pub(crate) fn prompt_fix_selection(fixable: &[Issue]) -> Result<Selection> {
    let mut stderr = io::stderr().lock();
    writeln!(stderr, "修正可能な問題:")?;
    for (i, issue) in fixable.iter().enumerate() {
        writeln!(
            stderr,
            "  [{}] ({}) {}: {}",
            i + 1,
            issue.severity,
            issue.name,
            issue.fix_command
        )?;
    }
    write!(
        stderr,
        "修正する問題を選択してください（例: 1,3-5 / all / none）[既定: all]: "
    )?;
    stderr.flush()?;

    let mut input = String::new();
    let mut stdin = io::stdin().lock();
    let n = stdin.read_line(&mut input)?;
    if n == 0 {
        return Ok(Selection::None);
    }
    parse_selection(&input, fixable.len())
}

pub(crate) fn parse_selection(input: &str, max: usize) -> Result<Selection> {
    if max == 0 {
        return Ok(Selection::None);
    }

    let s = input.trim();
    if s.is_empty() {
        return Ok(Selection::All);
    }

    let s = s.to_ascii_lowercase();
    match s.as_str() {
        "all" | "*" | "すべて" => return Ok(Selection::All),
        "none" | "no" | "n" | "q" | "quit" | "なし" | "キャンセル" => {
            return Ok(Selection::None);
        }
        _ => {}
    }

    let mut selected = vec![false; max];
    for token in s.split(|c: char| c == ',' || c.is_whitespace()) {
        let token = token.trim();
        if token.is_empty() {
            continue;
        }

        let (start, end) = match token.split_once('-') {
            Some((start, end)) => (parse_index(start, token)?, parse_index(end, token)?),
            None => {
                let idx = parse_index(token, token)?;
                (idx, idx)
            }
        };
        if start > end {
            return Err(anyhow!("範囲指定が不正です（start > end）: {token}"));
        }
        if end > max {
            return Err(anyhow!("選択が範囲外です（最大 {max}）: {token}"));
        }
        for slot in &mut selected[start - 1..end] {
            *slot = true;
        }
    }

    let indices: Vec<usize> = selected
        .into_iter()
        .enumerate()
        .filter_map(|(idx, on)| on.then_some(idx))
        .collect();

    if indices.is_empty() {
        return Err(anyhow!(
            "問題が選択されていません（'all' または 'none' を使用できます）"
        ));
    }

    Ok(Selection::Indices(indices))
}

fn parse_index(s: &str, token: &str) -> Result<usize> {
    let idx = s
        .trim()
        .parse::<usize>()
        .map_err(|_| anyhow!("選択が不正です: {token}"))?;
    if idx == 0 {
        return Err(anyhow!("選択は1始まりです（0は指定できません）: {token}"));
    }
    Ok(idx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Fixability, Severity};

    fn issue(name: &str) -> Issue {
        Issue {
            name: name.to_string(),
            description: String::new(),
            severity: Severity::Low,
            fix_command: "true".to_string(),
            fixable: Fixability::Auto,
            source: "probe".to_string(),
            requires_reboot: false,
        }
    }

    #[test]
    fn empty_input_defaults_to_all() {
        assert_eq!(parse_selection("", 3).unwrap(), Selection::All);
        assert_eq!(parse_selection("  *  ", 3).unwrap(), Selection::All);
    }

    #[test]
    fn none_variants() {
        for s in ["none", "n", "q", "なし"] {
            assert_eq!(parse_selection(s, 2).unwrap(), Selection::None);
        }
        assert_eq!(parse_selection("1", 0).unwrap(), Selection::None);
    }

    #[test]
    fn numbers_and_ranges_are_deduplicated() {
        assert_eq!(
            parse_selection("1,3-5 4", 5).unwrap(),
            Selection::Indices(vec![0, 2, 3, 4])
        );
    }

    #[test]
    fn rejects_zero_reversed_and_out_of_range() {
        assert!(parse_selection("0", 2).is_err());
        assert!(parse_selection("2-1", 2).is_err());
        assert!(parse_selection("1-3", 2).is_err());
        assert!(parse_selection("x", 2).is_err());
        assert!(parse_selection(",", 2).is_err());
    }

    #[test]
    fn pick_returns_offered_issues_in_order() {
        let offered = vec![issue("a"), issue("b"), issue("c")];
        let names = |v: Vec<Issue>| v.into_iter().map(|i| i.name).collect::<Vec<_>>();
        assert_eq!(names(Selection::Indices(vec![0, 2]).pick(&offered)), ["a", "c"]);
        assert_eq!(names(Selection::All.pick(&offered)), ["a", "b", "c"]);
        assert!(Selection::None.pick(&offered).is_empty());
    }
}
