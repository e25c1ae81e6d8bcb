pub mod aggregator;
pub mod cache;
pub mod classifier;
pub mod config;
pub mod logging;
pub mod ports;
pub mod refresh;
pub mod storage;
pub mod upstream;

#[cfg(test)]
pub(crate) mod testing;

use std::collections::BTreeMap;

use aggregator::AggregatorService;
use cache::CacheService;
use classifier::ClassifierService;
use refresh::RefreshService;
use storage::StorageService;
use upstream::UpstreamService;

#[derive(Debug, Clone, Default)]
pub struct AppServices {
    upstream: UpstreamService,
    classifier: ClassifierService,
    cache: CacheService,
    aggregator: AggregatorService,
    refresh: RefreshService,
    storage: StorageService,
}

impl AppServices {
    pub fn health_report(&self) -> BTreeMap<String, String> {
        let mut report = BTreeMap::new();
        report.insert(
            self.upstream.name().to_string(),
            self.upstream.status().to_string(),
        );
        report.insert(
            self.classifier.name().to_string(),
            self.classifier.status().to_string(),
        );
        report.insert(self.cache.name().to_string(), self.cache.status().to_string());
        report.insert(
            self.aggregator.name().to_string(),
            self.aggregator.status().to_string(),
        );
        report.insert(
            self.refresh.name().to_string(),
            self.refresh.status().to_string(),
        );
        report.insert(
            self.storage.name().to_string(),
            self.storage.status().to_string(),
        );
        report
    }
}
