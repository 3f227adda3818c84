//! Development-project transform: staged rows → canonical projects
//! plus country and sector association rows.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{info, warn};

use debtrace_common::StagedProject;
use debtrace_store::{Project, ProjectCountry, ProjectSector, TransformStore};

use crate::currency::CurrencyEngine;
use crate::error::Result;
use crate::standardize::NameStandardizer;

pub const DEFAULT_BATCH_SIZE: usize = 5000;

pub struct ProjectTransform {
    store: Arc<dyn TransformStore>,
    standardizer: NameStandardizer,
    currency: CurrencyEngine,
    /// Canonical country name → ISO-2 code, for the rate lookup.
    country_codes: HashMap<String, String>,
    batch_size: usize,
}

impl ProjectTransform {
    pub fn new(
        store: Arc<dyn TransformStore>,
        standardizer: NameStandardizer,
        currency: CurrencyEngine,
        country_codes: HashMap<String, String>,
    ) -> Self {
        Self {
            store,
            standardizer,
            currency,
            country_codes,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Processes staged batches until none remain. Each batch upserts
    /// canonical projects, rebuilds their associations, and deletes
    /// its staged rows, so a re-run over the same job is a no-op.
    pub async fn run(&self) -> Result<()> {
        let banks: HashMap<String, (i64, Option<String>)> = self
            .store
            .get_banks()
            .await?
            .into_iter()
            .map(|bank| (bank.abbrev_name.to_uppercase(), (bank.id, bank.ac_name)))
            .collect();
        let countries: HashMap<String, i64> = self
            .store
            .get_countries()
            .await?
            .into_iter()
            .map(|c| (c.name, c.id))
            .collect();
        let sectors: HashMap<String, i64> = self
            .store
            .get_sectors()
            .await?
            .into_iter()
            .map(|s| (s.name, s.id))
            .collect();

        loop {
            let staged = self.store.get_staged_projects(self.batch_size).await?;
            if staged.is_empty() {
                info!("No staged projects remaining");
                return Ok(());
            }
            info!(staged = staged.len(), "Transforming staged project batch");
            self.process_batch(staged, &banks, &countries, &sectors).await?;
        }
    }

    async fn process_batch(
        &self,
        staged: Vec<StagedProject>,
        banks: &HashMap<String, (i64, Option<String>)>,
        countries: &HashMap<String, i64>,
        sectors: &HashMap<String, i64>,
    ) -> Result<()> {
        let staged_ids: Vec<i64> = staged.iter().filter_map(|record| record.id).collect();

        let projects = self.build_projects(staged, banks);
        let upserted = self.store.bulk_upsert_projects(&projects).await?;
        info!(upserted = upserted.len(), "Upserted canonical projects");

        let country_links = explode_associations(&upserted, countries, |p| {
            p.country_list_stnd.as_deref()
        })
        .into_iter()
        .map(|(project_id, country_id)| ProjectCountry {
            project_id,
            country_id,
        })
        .collect::<Vec<_>>();
        let (inserted, created) = self.store.bulk_insert_project_countries(&country_links).await?;
        if created {
            info!(inserted, "Inserted project-country rows");
        }

        let sector_links = explode_associations(&upserted, sectors, |p| {
            p.sector_list_stnd.as_deref()
        })
        .into_iter()
        .map(|(project_id, sector_id)| ProjectSector {
            project_id,
            sector_id,
        })
        .collect::<Vec<_>>();
        let (inserted, created) = self.store.bulk_insert_project_sectors(&sector_links).await?;
        if created {
            info!(inserted, "Inserted project-sector rows");
        }

        self.store.delete_staged_projects(&staged_ids).await?;
        Ok(())
    }

    fn build_projects(
        &self,
        staged: Vec<StagedProject>,
        banks: &HashMap<String, (i64, Option<String>)>,
    ) -> Vec<Project> {
        let reconciled = reconcile_by_url(staged);
        reconciled
            .into_iter()
            .map(|record| {
                let status = record
                    .status
                    .as_deref()
                    .map(|s| self.standardizer.standardize_status(s));
                let country_list_stnd = record
                    .countries
                    .as_deref()
                    .map(|c| self.standardizer.standardize_country_list(c));
                let sector_list_stnd = record
                    .sectors
                    .as_deref()
                    .map(|s| self.standardizer.standardize_sector_list(s));
                let loan_amount_usd = self.normalize_amount(&record, country_list_stnd.as_deref());

                let bank = banks.get(&record.bank.to_uppercase());
                if bank.is_none() {
                    warn!(bank = %record.bank, url = %record.url, "No bank record for staged project");
                }

                Project {
                    id: None,
                    bank_id: bank.map(|(id, _)| *id),
                    ac_name: bank.and_then(|(_, ac_name)| ac_name.clone()),
                    number: record.number,
                    name: clean_text(record.name),
                    status,
                    year: record.year,
                    month: record.month,
                    day: record.day,
                    loan_amount: record.loan_amount,
                    loan_amount_currency: record.loan_amount_currency,
                    loan_amount_usd,
                    sector_list_raw: clean_text(record.sectors),
                    sector_list_stnd,
                    companies: clean_text(record.companies),
                    country_list_raw: clean_text(record.countries),
                    country_list_stnd,
                    url: record.url,
                }
            })
            .collect()
    }

    /// Converts the loan amount to 2017 USD via the first listed
    /// country's exchange rate. Any missing piece logs and yields
    /// null rather than failing the batch.
    fn normalize_amount(
        &self,
        record: &StagedProject,
        country_list_stnd: Option<&str>,
    ) -> Option<f64> {
        let (year, amount, currency) =
            match (record.year, record.loan_amount, record.loan_amount_currency.as_deref()) {
                (Some(year), Some(amount), Some(currency)) => (year, amount, currency),
                _ => return None,
            };
        let first_country = country_list_stnd?.split(", ").next()?;
        let Some(code) = self.country_codes.get(first_country) else {
            warn!(
                country = first_country,
                url = %record.url,
                "No ISO code for country; cannot normalize amount"
            );
            return None;
        };

        match self.currency.normalize(year, code, currency, amount) {
            Ok(normalized) => Some(normalized),
            Err(e) => {
                warn!(url = %record.url, error = %e, "Unable to normalize currency for record");
                None
            }
        }
    }
}

/// Result-page and project-page passes can stage the same URL twice;
/// later rows fill whatever fields earlier rows left empty. Output
/// order follows first appearance, one record per URL.
fn reconcile_by_url(staged: Vec<StagedProject>) -> Vec<StagedProject> {
    let mut order: Vec<String> = Vec::new();
    let mut merged: HashMap<String, StagedProject> = HashMap::new();

    for record in staged {
        match merged.get_mut(&record.url) {
            None => {
                order.push(record.url.clone());
                merged.insert(record.url.clone(), record);
            }
            Some(existing) => coalesce(existing, record),
        }
    }

    order
        .into_iter()
        .filter_map(|url| merged.remove(&url))
        .collect()
}

fn coalesce(base: &mut StagedProject, other: StagedProject) {
    fn fill<T>(slot: &mut Option<T>, value: Option<T>) {
        if slot.is_none() {
            *slot = value;
        }
    }
    fill(&mut base.number, other.number);
    fill(&mut base.name, other.name);
    fill(&mut base.status, other.status);
    fill(&mut base.year, other.year);
    fill(&mut base.month, other.month);
    fill(&mut base.day, other.day);
    fill(&mut base.loan_amount, other.loan_amount);
    fill(&mut base.loan_amount_currency, other.loan_amount_currency);
    fill(&mut base.loan_amount_usd, other.loan_amount_usd);
    fill(&mut base.sectors, other.sectors);
    fill(&mut base.countries, other.countries);
    fill(&mut base.companies, other.companies);
}

/// Replaces line-break artifacts with plain spaces.
fn clean_text(value: Option<String>) -> Option<String> {
    value.map(|text| {
        text.chars()
            .map(|c| if matches!(c, '\n' | '\t' | '\r') { ' ' } else { c })
            .collect()
    })
}

/// Explodes standardized name lists into `(project_id, ref_id)` pairs,
/// dropping names with no reference row.
fn explode_associations<'a>(
    upserted: &'a [Project],
    reference: &HashMap<String, i64>,
    list: impl Fn(&'a Project) -> Option<&'a str>,
) -> Vec<(i64, i64)> {
    let mut pairs = Vec::new();
    for project in upserted {
        let Some(project_id) = project.id else {
            continue;
        };
        let Some(names) = list(project) else {
            continue;
        };
        for name in names.split(", ") {
            if let Some(ref_id) = reference.get(name) {
                pairs.push((project_id, *ref_id));
            }
        }
    }
    pairs
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::currency::{CurrencyEngine, Deflators, ExchangeRates};
    use crate::testing::{standardizer_fixture, MockTransformStore};

    fn transform(store: Arc<MockTransformStore>) -> ProjectTransform {
        let currency = CurrencyEngine::new(
            ExchangeRates::from_parts([(2022, "IN", "USD", 1.0), (2022, "US", "USD", 1.0)]),
            Deflators::from_parts([(2022, 117.97)]),
        );
        let country_codes = HashMap::from([
            ("India".to_string(), "IN".to_string()),
            ("Kosovo".to_string(), "XK".to_string()),
        ]);
        ProjectTransform::new(store, standardizer_fixture(), currency, country_codes)
            .with_batch_size(100)
    }

    fn staged(id: i64, url: &str) -> StagedProject {
        StagedProject {
            id: Some(id),
            bank: "ADB".to_string(),
            url: url.to_string(),
            ..StagedProject::default()
        }
    }

    #[tokio::test]
    async fn batch_standardizes_normalizes_and_links() {
        let store = Arc::new(MockTransformStore::new());
        store.push_staged_project(StagedProject {
            name: Some("Rural\nRoads".to_string()),
            status: Some("dropped".to_string()),
            countries: Some("indien".to_string()),
            sectors: Some("agriculture".to_string()),
            year: Some(2022),
            loan_amount: Some(100.0),
            loan_amount_currency: Some("USD".to_string()),
            ..staged(11, "https://www.adb.org/projects/1")
        });

        let transform = transform(store.clone());
        transform.run().await.unwrap();

        let upserted = store.upserted_projects.lock().unwrap();
        assert_eq!(upserted.len(), 1);
        let project = &upserted[0];
        assert_eq!(project.bank_id, Some(1));
        assert_eq!(project.name.as_deref(), Some("Rural Roads"));
        assert_eq!(project.status.as_deref(), Some("Cancelled"));
        assert_eq!(project.country_list_stnd.as_deref(), Some("India"));
        assert_eq!(project.sector_list_stnd.as_deref(), Some("Agribusiness"));
        assert_eq!(project.loan_amount_usd, Some(84.77));

        // Associations resolved against reference ids.
        assert_eq!(
            store.project_countries.lock().unwrap().as_slice(),
            &[ProjectCountry { project_id: 101, country_id: 21 }]
        );
        assert_eq!(
            store.project_sectors.lock().unwrap().as_slice(),
            &[ProjectSector { project_id: 101, sector_id: 31 }]
        );

        // Batch consumed: staged rows deleted, re-run is a no-op.
        assert_eq!(store.deleted_project_ids.lock().unwrap().as_slice(), &[11]);
        transform.run().await.unwrap();
        assert_eq!(store.upserted_projects.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn partial_rows_for_one_url_reconcile_into_one_project() {
        let store = Arc::new(MockTransformStore::new());
        store.push_staged_project(StagedProject {
            name: Some("Acme Microfinance".to_string()),
            countries: Some("indien".to_string()),
            ..staged(1, "https://www.bio-invest.be/en/investments/acme")
        });
        store.push_staged_project(StagedProject {
            status: Some("dropped".to_string()),
            year: Some(2022),
            loan_amount: Some(200.0),
            loan_amount_currency: Some("USD".to_string()),
            ..staged(2, "https://www.bio-invest.be/en/investments/acme")
        });

        transform(store.clone()).run().await.unwrap();

        let upserted = store.upserted_projects.lock().unwrap();
        assert_eq!(upserted.len(), 1);
        let project = &upserted[0];
        assert_eq!(project.name.as_deref(), Some("Acme Microfinance"));
        assert_eq!(project.status.as_deref(), Some("Cancelled"));
        assert_eq!(project.loan_amount, Some(200.0));
        assert_eq!(project.loan_amount_usd, Some(169.53));
    }

    #[tokio::test]
    async fn missing_rate_yields_null_usd_amount_not_failure() {
        let store = Arc::new(MockTransformStore::new());
        store.push_staged_project(StagedProject {
            countries: Some("kosovo*".to_string()),
            year: Some(1999),
            loan_amount: Some(5.0),
            loan_amount_currency: Some("EUR".to_string()),
            ..staged(5, "https://www.adb.org/projects/5")
        });

        transform(store.clone()).run().await.unwrap();

        let upserted = store.upserted_projects.lock().unwrap();
        assert_eq!(upserted[0].loan_amount_usd, None);
        assert_eq!(upserted[0].loan_amount, Some(5.0));
    }

    #[test]
    fn reconcile_keeps_first_appearance_order() {
        let records = vec![
            staged(1, "https://a.example/1"),
            staged(2, "https://a.example/2"),
            staged(3, "https://a.example/1"),
        ];
        let reconciled = reconcile_by_url(records);
        assert_eq!(reconciled.len(), 2);
        assert_eq!(reconciled[0].url, "https://a.example/1");
        assert_eq!(reconciled[1].url, "https://a.example/2");
    }
}
