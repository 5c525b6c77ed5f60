use tracing::debug;

use scrape_core::models::ScraperType;

/// 某个节点在某一抓取器类型上的当前负载
#[derive(Debug, Clone, PartialEq)]
pub struct NodeLoad<'a> {
    pub name: &'a str,
    pub current: usize,
}

/// 节点选择策略
pub trait NodeSelectionStrategy: Send + Sync {
    /// 返回被选中节点在 `nodes` 中的下标
    fn select(&self, scraper_type: ScraperType, nodes: &[NodeLoad<'_>]) -> Option<usize>;

    fn name(&self) -> &str;
}

/// 贪心选择当前负载最低的节点，负载相同取迭代顺序靠前者
#[derive(Debug, Default)]
pub struct LeastLoadedStrategy;

impl LeastLoadedStrategy {
    pub fn new() -> Self {
        Self
    }
}

impl NodeSelectionStrategy for LeastLoadedStrategy {
    fn select(&self, scraper_type: ScraperType, nodes: &[NodeLoad<'_>]) -> Option<usize> {
        if nodes.is_empty() {
            debug!("没有可用的Worker节点");
            return None;
        }

        // min_by_key 在相等时返回第一个元素
        let (index, selected) = nodes.iter().enumerate().min_by_key(|(_, node)| node.current)?;

        debug!(
            "负载均衡策略选择节点: {} ({} 类型负载: {})",
            selected.name, scraper_type, selected.current
        );
        Some(index)
    }

    fn name(&self) -> &str {
        "LeastLoaded"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loads(values: &[usize]) -> Vec<NodeLoad<'static>> {
        const NAMES: [&str; 4] = ["w1", "w2", "w3", "w4"];
        values
            .iter()
            .enumerate()
            .map(|(i, current)| NodeLoad {
                name: NAMES[i],
                current: *current,
            })
            .collect()
    }

    #[test]
    fn test_equal_load_picks_first_node() {
        let strategy = LeastLoadedStrategy::new();
        assert_eq!(strategy.select(ScraperType::Browser, &loads(&[0, 0])), Some(0));
        assert_eq!(strategy.select(ScraperType::Browser, &loads(&[3, 3, 3])), Some(0));
    }

    #[test]
    fn test_strictly_lower_load_wins() {
        let strategy = LeastLoadedStrategy::new();
        assert_eq!(strategy.select(ScraperType::Request, &loads(&[2, 1])), Some(1));
        assert_eq!(strategy.select(ScraperType::Request, &loads(&[4, 2, 1, 2])), Some(2));
    }

    #[test]
    fn test_no_nodes() {
        assert_eq!(LeastLoadedStrategy::new().select(ScraperType::Task, &[]), None);
    }
}
