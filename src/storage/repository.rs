use serde::Serialize;
use sqlx::PgPool;

pub mod memory;
pub mod task;

pub use memory::InMemoryTaskRepository;
pub use task::{PgTaskRepository, TaskRepository};

/// 分頁結果
#[derive(Debug, Clone, Serialize)]
pub struct Page<T> {
    pub data: Vec<T>,
    /// 分頁前符合條件的總數
    pub total: i64,
    pub limit: i64,
    pub offset: i64,
}

impl<T> Page<T> {
    pub fn new(data: Vec<T>, total: i64, limit: i64, offset: i64) -> Self {
        Self {
            data,
            total,
            limit,
            offset,
        }
    }

    pub fn empty(limit: i64, offset: i64) -> Self {
        Self::new(Vec::new(), 0, limit, offset)
    }

    pub fn has_more(&self) -> bool {
        self.offset + (self.data.len() as i64) < self.total
    }
}

/// 通用的數據庫操作特性
pub trait DbExecutor {
    fn get_pool(&self) -> &PgPool;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_has_more() {
        let page = Page::new(vec![1, 2], 5, 2, 0);
        assert!(page.has_more());
        let last = Page::new(vec![5], 5, 2, 4);
        assert!(!last.has_more());
        assert!(!Page::<i32>::empty(10, 0).has_more());
    }
}
