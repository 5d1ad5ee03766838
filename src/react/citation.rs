//! 引用格式：[Source: name] / [Sources: a; b]
//!
//! 来源名只能取自本轮 DocumentHits 的 sourceName。sanitize 移除回答中不在允许列表内的名字，
//! 整个括号内都是编造的名字时删掉整个括号。流式输出经 CitationFilter 逐段清理。

const SINGLE: &str = "[Source: ";
const MULTI: &str = "[Sources: ";

/// 一处引用
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Citation {
    /// 在原文中的字节区间（含方括号）
    pub start: usize,
    pub end: usize,
    pub names: Vec<String>,
}

/// 按来源个数生成引用文本；无来源时返回 None
pub fn format_citation<S: AsRef<str>>(names: &[S]) -> Option<String> {
    match names {
        [] => None,
        [one] => Some(format!("{SINGLE}{}]", one.as_ref())),
        many => Some(format!(
            "{MULTI}{}]",
            many.iter().map(AsRef::as_ref).collect::<Vec<_>>().join("; ")
        )),
    }
}

/// 提取回答中的所有引用
pub fn find_citations(text: &str) -> Vec<Citation> {
    let mut out = Vec::new();
    let mut pos = 0;
    while let Some(rel) = text[pos..].find('[') {
        let start = pos + rel;
        let rest = &text[start..];
        let prefix = if rest.starts_with(MULTI) {
            MULTI
        } else if rest.starts_with(SINGLE) {
            SINGLE
        } else {
            pos = start + 1;
            continue;
        };
        let Some(close) = rest.find(']') else { break };
        let names = rest[prefix.len()..close]
            .split(';')
            .map(|n| n.trim().to_string())
            .filter(|n| !n.is_empty())
            .collect();
        out.push(Citation {
            start,
            end: start + close + 1,
            names,
        });
        pos = start + close + 1;
    }
    out
}

/// 回答中出现但不在允许列表内的来源名（去重，保持出现顺序）
pub fn invented_names(text: &str, allowed: &[String]) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for name in find_citations(text).into_iter().flat_map(|c| c.names) {
        if !allowed.contains(&name) && !out.contains(&name) {
            out.push(name);
        }
    }
    out
}

/// 删除编造的来源名；括号内全部编造时连同前导空格删掉整个引用
pub fn sanitize(text: &str, allowed: &[String]) -> String {
    let mut out = String::with_capacity(text.len());
    let mut last = 0;
    for c in find_citations(text) {
        let kept: Vec<&String> = c.names.iter().filter(|n| allowed.contains(n)).collect();
        if kept.len() == c.names.len() {
            continue;
        }
        let mut head = &text[last..c.start];
        if kept.is_empty() {
            head = head.trim_end_matches(' ');
        }
        out.push_str(head);
        if let Some(rebuilt) = format_citation(&kept) {
            out.push_str(&rebuilt);
        }
        last = c.end;
    }
    out.push_str(&text[last..]);
    out
}

/// 首个尚未闭合（或可能成为引用前缀）的 `[` 的位置
fn open_citation_start(text: &str) -> Option<usize> {
    let mut pos = 0;
    while let Some(rel) = text[pos..].find('[') {
        let start = pos + rel;
        let rest = &text[start..];
        if rest.starts_with(MULTI) || rest.starts_with(SINGLE) {
            match rest.find(']') {
                Some(close) => pos = start + close + 1,
                None => return Some(start),
            }
        } else if MULTI.starts_with(rest) || SINGLE.starts_with(rest) {
            return Some(start);
        } else {
            pos = start + 1;
        }
    }
    None
}

/// 流式引用清理：未闭合的引用（及其前导空格）先缓存，闭合后整体清理再放出
#[derive(Debug, Clone, Default)]
pub struct CitationFilter {
    allowed: Vec<String>,
    pending: String,
    removed: Vec<String>,
}

impl CitationFilter {
    pub fn new(allowed: Vec<String>) -> Self {
        Self {
            allowed,
            ..Self::default()
        }
    }

    /// 追加一个片段，返回可以立即输出的已清理文本（可能为空）
    pub fn push(&mut self, fragment: &str) -> String {
        self.pending.push_str(fragment);
        let held = open_citation_start(&self.pending).unwrap_or(self.pending.len());
        let cut = self.pending[..held].trim_end_matches(' ').len();
        let ready: String = self.pending.drain(..cut).collect();
        self.clean(&ready)
    }

    /// 流结束：放出剩余缓存
    pub fn finish(&mut self) -> String {
        let rest = std::mem::take(&mut self.pending);
        self.clean(&rest)
    }

    /// 已删除的编造来源名
    pub fn removed(&self) -> &[String] {
        &self.removed
    }

    fn clean(&mut self, text: &str) -> String {
        for name in invented_names(text, &self.allowed) {
            if !self.removed.contains(&name) {
                self.removed.push(name);
            }
        }
        sanitize(text, &self.allowed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn allowed(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_format_single_and_multi() {
        assert_eq!(format_citation(&["a.pdf"]).unwrap(), "[Source: a.pdf]");
        assert_eq!(format_citation(&["a.pdf", "b.pdf"]).unwrap(), "[Sources: a.pdf; b.pdf]");
        assert!(format_citation::<&str>(&[]).is_none());
    }

    #[test]
    fn test_find_citations() {
        let text = "Laptops ship day one [Source: onboarding.pdf]. See [1] and [Sources: a; b].";
        let found = find_citations(text);
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].names, vec!["onboarding.pdf"]);
        assert_eq!(found[1].names, vec!["a", "b"]);
        assert_eq!(&text[found[0].start..found[0].end], "[Source: onboarding.pdf]");
    }

    #[test]
    fn test_sanitize_removes_invented() {
        let ok = allowed(&["onboarding.pdf"]);
        assert_eq!(
            sanitize("Day one [Source: handbook.pdf].", &ok),
            "Day one."
        );
        assert_eq!(
            sanitize("Day one [Sources: onboarding.pdf; handbook.pdf].", &ok),
            "Day one [Source: onboarding.pdf]."
        );
        let clean = "Day one [Source: onboarding.pdf].";
        assert_eq!(sanitize(clean, &ok), clean);
        assert_eq!(invented_names("x [Source: handbook.pdf]", &ok), vec!["handbook.pdf"]);
    }

    #[test]
    fn test_unclosed_bracket_is_ignored() {
        assert!(find_citations("broken [Source: a.pdf").is_empty());
    }

    fn run_filter(allowed_names: &[&str], fragments: &[&str]) -> (Vec<String>, CitationFilter) {
        let mut filter = CitationFilter::new(allowed(allowed_names));
        let mut out: Vec<String> = fragments.iter().map(|f| filter.push(f)).collect();
        out.push(filter.finish());
        (out, filter)
    }

    #[test]
    fn test_filter_cleans_citation_split_across_fragments() {
        let (out, filter) = run_filter(
            &["onboarding.pdf"],
            &["Day one [Sources: onboarding.pdf; ", "handbook.pdf]."],
        );
        assert_eq!(out.concat(), "Day one [Source: onboarding.pdf].");
        assert_eq!(out[0], "Day one");
        assert_eq!(filter.removed(), ["handbook.pdf".to_string()]);
    }

    #[test]
    fn test_filter_holds_space_before_dropped_citation() {
        let (out, _) = run_filter(&[], &["Laptops ship ", "[Sour", "ce: handbook.pdf]", " today."]);
        assert_eq!(out.concat(), "Laptops ship today.");
    }

    #[test]
    fn test_filter_passes_plain_text_and_other_brackets() {
        let (out, filter) = run_filter(&["a.pdf"], &["See [1] and ", "[Source: a.pdf]", " ok"]);
        assert_eq!(out.concat(), "See [1] and [Source: a.pdf] ok");
        assert_eq!(out[0], "See [1] and");
        assert!(filter.removed().is_empty());
    }

    #[test]
    fn test_filter_flushes_unclosed_bracket_at_end() {
        let (out, _) = run_filter(&[], &["broken [Source: a.pdf"]);
        assert_eq!(out.concat(), "broken [Source: a.pdf");
    }
}
