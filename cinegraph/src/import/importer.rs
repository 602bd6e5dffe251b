use crate::errors::Result;
use crate::import::engine::{BatchImportEngine, ImportReport};
use crate::processors::{MovieProcessor, RowProcessor, ShowProcessor, StaticProcessor};
use crate::source::{PagedQuery, RelationalSource};

/// Movies or shows, paged by source row id.
pub struct PrimaryImporter {
    label: &'static str,
    table: &'static str,
    processor: Box<dyn RowProcessor>,
}

impl PrimaryImporter {
    pub fn movies() -> Self {
        Self {
            label: "movies",
            table: "movies",
            processor: Box::new(MovieProcessor::new()),
        }
    }

    pub fn shows() -> Self {
        Self {
            label: "shows",
            table: "shows",
            processor: Box::new(ShowProcessor::new()),
        }
    }

    pub fn label(&self) -> &'static str {
        self.label
    }

    pub fn query(&self, page_size: usize) -> PagedQuery {
        PagedQuery::keyset(format!("SELECT * FROM {}", self.table), "id", page_size)
    }

    pub async fn run(
        &self,
        engine: &BatchImportEngine,
        source: &dyn RelationalSource,
        page_size: usize,
    ) -> Result<ImportReport> {
        engine
            .execute_import(source, &self.query(page_size), self.processor.as_ref(), self.label)
            .await
    }
}

/// Reference tables without a numeric id, paged by offset.
pub struct StaticImporter {
    label: &'static str,
    table: &'static str,
    processor: StaticProcessor,
}

impl StaticImporter {
    pub fn countries() -> Self {
        Self {
            label: "countries",
            table: "countries",
            processor: StaticProcessor::countries(),
        }
    }

    pub fn languages() -> Self {
        Self {
            label: "languages",
            table: "languages",
            processor: StaticProcessor::languages(),
        }
    }

    pub fn label(&self) -> &'static str {
        self.label
    }

    pub fn query(&self, page_size: usize) -> PagedQuery {
        PagedQuery::offset(
            format!(
                "SELECT * FROM {} ORDER BY {}",
                self.table,
                self.processor.key_column()
            ),
            page_size,
        )
    }

    pub async fn run(
        &self,
        engine: &BatchImportEngine,
        source: &dyn RelationalSource,
        page_size: usize,
    ) -> Result<ImportReport> {
        engine
            .execute_import(source, &self.query(page_size), &self.processor, self.label)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn queries_page_the_right_way() {
        let movies = PrimaryImporter::movies().query(50);
        assert_eq!(movies.sql, "SELECT * FROM movies");
        assert_eq!(movies.page_size, 50);
        assert!(matches!(
            movies.pagination,
            crate::source::Pagination::Keyset { ref column } if column == "id"
        ));

        let countries = StaticImporter::countries().query(10);
        assert_eq!(countries.sql, "SELECT * FROM countries ORDER BY iso_3166_1");
        assert_eq!(countries.pagination, crate::source::Pagination::Offset);
    }
}
