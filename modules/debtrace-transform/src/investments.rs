//! Form 13F transform: staged holdings → companies, form submissions,
//! and enriched investment rows.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use tracing::{info, warn};

use debtrace_common::StagedInvestment;
use debtrace_store::{Company, Form, Investment, TransformStore};

use crate::error::Result;
use crate::projects::DEFAULT_BATCH_SIZE;
use crate::stocks::{StockMetadata, StockMetadataProvider};

pub struct InvestmentTransform {
    store: Arc<dyn TransformStore>,
    stocks: Arc<dyn StockMetadataProvider>,
    batch_size: usize,
}

impl InvestmentTransform {
    pub fn new(store: Arc<dyn TransformStore>, stocks: Arc<dyn StockMetadataProvider>) -> Self {
        Self {
            store,
            stocks,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub async fn run(&self) -> Result<()> {
        loop {
            let staged = self.store.get_staged_investments(self.batch_size).await?;
            if staged.is_empty() {
                info!("No staged investments remaining");
                return Ok(());
            }
            info!(staged = staged.len(), "Transforming staged investment batch");
            self.process_batch(staged).await?;
        }
    }

    async fn process_batch(&self, staged: Vec<StagedInvestment>) -> Result<()> {
        let staged_ids: Vec<i64> = staged.iter().filter_map(|record| record.id).collect();

        // Unique filers, ordered by CIK for deterministic upserts.
        let companies = build_companies(&staged);
        let upserted_companies = self.store.bulk_upsert_companies(&companies).await?;
        let company_ids: HashMap<String, i64> = upserted_companies
            .into_iter()
            .filter_map(|company| company.id.map(|id| (company.cik, id)))
            .collect();
        info!(companies = company_ids.len(), "Upserted filer companies");

        let forms = build_forms(&staged, &company_ids);
        let upserted_forms = self.store.bulk_upsert_forms(&forms).await?;
        let form_ids: HashMap<String, i64> = upserted_forms
            .into_iter()
            .filter_map(|form| form.id.map(|id| (form.accession_number, id)))
            .collect();
        info!(forms = form_ids.len(), "Upserted form submissions");

        // Enrich by CUSIP before the final upsert.
        let cusips = unique_cusips(&staged);
        let metadata = self.stocks.fetch_stock_metadata(&cusips).await?;
        let metadata_by_cusip: HashMap<&str, &StockMetadata> =
            metadata.iter().map(|m| (m.cusip.as_str(), m)).collect();

        let investments = build_investments(&staged, &form_ids, &metadata_by_cusip);
        let upserted = self.store.bulk_upsert_investments(&investments).await?;
        info!(investments = upserted.len(), "Upserted investments");

        self.store.delete_staged_investments(&staged_ids).await?;
        Ok(())
    }
}

fn build_companies(staged: &[StagedInvestment]) -> Vec<Company> {
    let unique: BTreeMap<&str, Option<&str>> = staged
        .iter()
        .map(|record| (record.company_cik.as_str(), record.company_name.as_deref()))
        .collect();
    unique
        .into_iter()
        .map(|(cik, name)| Company {
            id: None,
            cik: cik.to_string(),
            name: name.map(str::to_string),
        })
        .collect()
}

fn build_forms(staged: &[StagedInvestment], company_ids: &HashMap<String, i64>) -> Vec<Form> {
    let mut seen = HashSet::new();
    let mut forms = Vec::new();
    for record in staged {
        if !seen.insert(record.form_accession_number.as_str()) {
            continue;
        }
        let Some(company_id) = company_ids.get(&record.company_cik) else {
            warn!(cik = %record.company_cik, "No company id for staged form");
            continue;
        };
        forms.push(Form {
            id: None,
            company_id: *company_id,
            name: record.form_name.clone(),
            accession_number: record.form_accession_number.clone(),
            report_period: record.form_report_period.clone(),
            filing_date: record.form_filing_date.clone(),
            acceptance_date: record.form_acceptance_date.clone(),
            effective_date: record.form_effective_date.clone(),
            url: record.form_url.clone(),
        });
    }
    forms
}

fn unique_cusips(staged: &[StagedInvestment]) -> Vec<String> {
    let mut seen = HashSet::new();
    staged
        .iter()
        .filter(|record| seen.insert(record.stock_cusip.as_str()))
        .map(|record| record.stock_cusip.clone())
        .collect()
}

/// Merges holdings with form ids and stock metadata, scrubs line
/// breaks, and deduplicates on `(form_id, cusip, manager)`.
fn build_investments(
    staged: &[StagedInvestment],
    form_ids: &HashMap<String, i64>,
    metadata: &HashMap<&str, &StockMetadata>,
) -> Vec<Investment> {
    let mut seen = HashSet::new();
    let mut investments = Vec::new();

    for record in staged {
        let Some(form_id) = form_ids.get(&record.form_accession_number) else {
            warn!(
                accession_number = %record.form_accession_number,
                "No form id for staged investment"
            );
            continue;
        };
        let manager = scrub(&record.stock_manager);
        if !seen.insert((*form_id, record.stock_cusip.clone(), manager.clone())) {
            continue;
        }

        let enrichment = metadata.get(record.stock_cusip.as_str());
        investments.push(Investment {
            id: None,
            form_id: *form_id,
            exchange_code: enrichment.and_then(|m| m.exchange_code.clone()),
            issuer_name: scrub(&record.stock_issuer_name),
            cusip: record.stock_cusip.clone(),
            title_class: record.stock_title_class.as_deref().map(scrub),
            market_sector: enrichment.and_then(|m| m.market_sector.clone()),
            security_type: enrichment.and_then(|m| m.security_type.clone()),
            ticker: enrichment.and_then(|m| m.ticker.clone()),
            value_x1000: record.stock_value_x1000,
            shares_prn_amt: record.stock_shares_prn_amt,
            sh_prn: record.stock_sh_prn.clone(),
            put_call: record.stock_put_call.clone(),
            investment_discretion: record.stock_investment_discretion.clone(),
            manager,
            voting_auth_sole: record.stock_voting_auth_sole,
            voting_auth_shared: record.stock_voting_auth_shared,
            voting_auth_none: record.stock_voting_auth_none,
        });
    }
    investments
}

fn scrub(value: &str) -> String {
    value
        .chars()
        .filter(|c| !matches!(c, '\n' | '\t' | '\r'))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;

    use crate::error::Result as TransformResult;
    use crate::testing::MockTransformStore;

    struct CannedStocks {
        pub requested: Mutex<Vec<Vec<String>>>,
    }

    #[async_trait]
    impl StockMetadataProvider for CannedStocks {
        async fn fetch_stock_metadata(
            &self,
            cusips: &[String],
        ) -> TransformResult<Vec<StockMetadata>> {
            self.requested.lock().unwrap().push(cusips.to_vec());
            Ok(cusips
                .iter()
                .map(|cusip| StockMetadata {
                    cusip: cusip.clone(),
                    name: Some("APPLE INC".to_string()),
                    ticker: Some("AAPL".to_string()),
                    exchange_code: Some("US".to_string()),
                    market_sector: Some("Equity".to_string()),
                    security_type: Some("Common Stock".to_string()),
                })
                .collect())
        }
    }

    fn holding(id: i64, cusip: &str, manager: &str) -> StagedInvestment {
        StagedInvestment {
            id: Some(id),
            company_cik: "0001067983".to_string(),
            company_name: Some("BERKSHIRE HATHAWAY INC".to_string()),
            form_name: Some("13F-HR".to_string()),
            form_accession_number: "0000950123-24-008740".to_string(),
            form_url: "https://www.sec.gov/Archives/edgar/data/1067983/x-index.htm".to_string(),
            stock_issuer_name: "APPLE INC".to_string(),
            stock_cusip: cusip.to_string(),
            stock_value_x1000: 1000,
            stock_shares_prn_amt: 50,
            stock_manager: manager.to_string(),
            ..StagedInvestment::default()
        }
    }

    #[tokio::test]
    async fn batch_builds_companies_forms_and_enriched_investments() {
        let store = Arc::new(MockTransformStore::new());
        store.push_staged_investment(holding(1, "037833100", "4"));
        store.push_staged_investment(holding(2, "594918104", ""));

        let stocks = Arc::new(CannedStocks {
            requested: Mutex::new(Vec::new()),
        });
        let transform = InvestmentTransform::new(store.clone(), stocks.clone());
        transform.run().await.unwrap();

        let companies = store.upserted_companies.lock().unwrap();
        assert_eq!(companies.len(), 1);
        assert_eq!(companies[0].cik, "0001067983");

        let forms = store.upserted_forms.lock().unwrap();
        assert_eq!(forms.len(), 1);
        assert_eq!(forms[0].company_id, companies[0].id.unwrap());

        let investments = store.upserted_investments.lock().unwrap();
        assert_eq!(investments.len(), 2);
        assert_eq!(investments[0].form_id, forms[0].id.unwrap());
        assert_eq!(investments[0].ticker.as_deref(), Some("AAPL"));
        assert_eq!(investments[0].market_sector.as_deref(), Some("Equity"));

        // Each unique CUSIP requested exactly once.
        let requested = stocks.requested.lock().unwrap();
        assert_eq!(requested.len(), 1);
        assert_eq!(requested[0], vec!["037833100", "594918104"]);

        assert_eq!(store.deleted_investment_ids.lock().unwrap().as_slice(), &[1, 2]);
    }

    #[tokio::test]
    async fn duplicate_holdings_dedupe_on_form_cusip_manager() {
        let store = Arc::new(MockTransformStore::new());
        store.push_staged_investment(holding(1, "037833100", "4"));
        store.push_staged_investment(holding(2, "037833100", "4"));
        store.push_staged_investment(holding(3, "037833100", "7"));

        let stocks = Arc::new(CannedStocks {
            requested: Mutex::new(Vec::new()),
        });
        InvestmentTransform::new(store.clone(), stocks)
            .run()
            .await
            .unwrap();

        let investments = store.upserted_investments.lock().unwrap();
        assert_eq!(investments.len(), 2);
    }

    #[tokio::test]
    async fn rerun_after_deletion_is_a_no_op() {
        let store = Arc::new(MockTransformStore::new());
        store.push_staged_investment(holding(1, "037833100", "4"));
        let stocks = Arc::new(CannedStocks {
            requested: Mutex::new(Vec::new()),
        });

        let transform = InvestmentTransform::new(store.clone(), stocks);
        transform.run().await.unwrap();
        transform.run().await.unwrap();

        assert_eq!(store.upserted_investments.lock().unwrap().len(), 1);
        assert_eq!(store.deleted_investment_ids.lock().unwrap().as_slice(), &[1]);
    }

    #[test]
    fn manager_scrubbing_drops_line_breaks() {
        assert_eq!(scrub("4,\n7"), "4,7");
    }
}
