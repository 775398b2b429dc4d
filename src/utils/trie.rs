use std::collections::BTreeMap;

/// 前缀字典：运算符最长匹配与补全候选查询共用。
///
/// 每个词记录插入顺序，`list_by_prefix` 按插入顺序返回。
#[derive(Debug, Default, Clone)]
pub struct PrefixIndex {
    root: Node,
    words: Vec<String>,
}

#[derive(Debug, Default, Clone)]
struct Node {
    children: BTreeMap<char, Node>,
    entry: Option<usize>,
}

impl PrefixIndex {
    /// 插入一个词，已存在时忽略。返回是否为新词。
    pub fn insert(&mut self, word: &str) -> bool {
        let mut node = &mut self.root;
        for c in word.chars() {
            node = node.children.entry(c).or_default();
        }
        if node.entry.is_some() {
            return false;
        }
        node.entry = Some(self.words.len());
        self.words.push(word.to_string());
        true
    }

    /// `text` 开头能匹配到的最长词，返回其字节长度。
    pub fn longest_match(&self, text: &str) -> Option<usize> {
        let mut node = &self.root;
        let mut best = None;
        for (offset, c) in text.char_indices() {
            match node.children.get(&c) {
                Some(next) => {
                    node = next;
                    if node.entry.is_some() {
                        best = Some(offset + c.len_utf8());
                    }
                }
                None => break,
            }
        }
        best
    }

    pub fn list_by_prefix(&self, prefix: &str) -> Vec<String> {
        let Some(node) = self.find(prefix) else {
            return Vec::new();
        };
        let mut found = Vec::new();
        collect(node, &mut found);
        found.sort_unstable();
        found
            .into_iter()
            .map(|index| self.words[index].clone())
            .collect()
    }

    pub fn word_count(&self) -> usize {
        self.words.len()
    }

    pub fn clear(&mut self) {
        self.root = Node::default();
        self.words.clear();
    }

    fn find(&self, prefix: &str) -> Option<&Node> {
        let mut node = &self.root;
        for c in prefix.chars() {
            node = node.children.get(&c)?;
        }
        Some(node)
    }
}

fn collect(node: &Node, found: &mut Vec<usize>) {
    if let Some(index) = node.entry {
        found.push(index);
    }
    for child in node.children.values() {
        collect(child, found);
    }
}

impl<'a> FromIterator<&'a str> for PrefixIndex {
    fn from_iter<T: IntoIterator<Item = &'a str>>(iter: T) -> Self {
        let mut index = PrefixIndex::default();
        for word in iter {
            index.insert(word);
        }
        index
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_longest_match_prefers_longer_operator() {
        let index: PrefixIndex = ["&", "&&", "|", "||", ">", ">>"].into_iter().collect();
        assert_eq!(index.longest_match("&& b"), Some(2));
        assert_eq!(index.longest_match("& b"), Some(1));
        assert_eq!(index.longest_match(">>>"), Some(2));
        assert_eq!(index.longest_match("abc"), None);
    }

    #[test]
    fn test_list_by_prefix_keeps_insertion_order() {
        let index: PrefixIndex = ["zeta", "alpha", "zebra", "zen"].into_iter().collect();
        assert_eq!(index.list_by_prefix("ze"), vec!["zeta", "zebra", "zen"]);
        assert_eq!(index.list_by_prefix("").len(), 4);
        assert!(index.list_by_prefix("q").is_empty());
    }

    #[test]
    fn test_insert_is_idempotent() {
        let mut index = PrefixIndex::default();
        assert!(index.insert("ls"));
        assert!(!index.insert("ls"));
        assert_eq!(index.word_count(), 1);
        assert_eq!(index.list_by_prefix("l"), vec!["ls"]);
        index.clear();
        assert_eq!(index.word_count(), 0);
        assert!(index.list_by_prefix("").is_empty());
    }
}
