//! Portfolio and per-project summaries computed from the dashboard tabs
//!
//! Each section reads one tab. A tab that does not exist yields an empty
//! section rather than an error, so a spreadsheet can grow its tabs over
//! time.

use chrono::NaiveDate;
use lazy_static::lazy_static;
use regex::Regex;
use serde::Serialize;

use crate::currency::{amount_or_zero, format_inr};
use crate::error::{ProxyError, Result};
use crate::normalize::{field, field_or_empty, filter_by_project, parse_flag, to_list};
use crate::record::Record;
use crate::sheets::SheetsBackend;
use crate::store::TabStore;

pub const PROJECTS_TAB: &str = "Projects";
pub const PAYMENTS_TAB: &str = "Payments";
pub const SALES_TAB: &str = "Sales";
pub const MATERIALS_TAB: &str = "Materials";
pub const DOCUMENTS_TAB: &str = "Documents";
pub const INVOICES_TAB: &str = "Invoices";
pub const UPDATES_TAB: &str = "Updates";

lazy_static! {
    static ref LEADING_NUMBER: Regex = Regex::new(r"^\s*(-?[\d,]*\.?\d+)").unwrap();
}

/// Leading numeric part of a cell such as `1,000 bags`, or 0
fn quantity(text: &str) -> f64 {
    LEADING_NUMBER
        .captures(text)
        .and_then(|caps| caps[1].replace(',', "").parse().ok())
        .unwrap_or(0.0)
}

fn status_is(record: &Record, wanted: &str) -> bool {
    field_or_empty(record, &["status"]).eq_ignore_ascii_case(wanted)
}

fn count_status(records: &[&Record], wanted: &str) -> usize {
    records.iter().filter(|r| status_is(r, wanted)).count()
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PortfolioSummary {
    pub total_projects: usize,
    pub in_progress: usize,
    pub completed: usize,
    pub planning: usize,
    pub total_budget: f64,
    pub total_budget_display: String,
    pub total_spent: f64,
    pub total_spent_display: String,
    pub total_units: u64,
    pub sold_units: u64,
}

fn sum_units(projects: &[Record], aliases: &[&str]) -> u64 {
    projects
        .iter()
        .map(|p| quantity(field_or_empty(p, aliases)).max(0.0) as u64)
        .sum()
}

/// Summarize every row of the Projects tab
pub fn summarize_portfolio(projects: &[Record]) -> PortfolioSummary {
    let all: Vec<&Record> = projects.iter().collect();
    let total_budget: f64 = projects
        .iter()
        .map(|p| amount_or_zero(field_or_empty(p, &["budget"])))
        .sum();
    let total_spent: f64 = projects
        .iter()
        .map(|p| amount_or_zero(field_or_empty(p, &["spent"])))
        .sum();

    PortfolioSummary {
        total_projects: projects.len(),
        in_progress: count_status(&all, "In Progress"),
        completed: count_status(&all, "Completed"),
        planning: count_status(&all, "Planning"),
        total_budget,
        total_budget_display: format_inr(total_budget),
        total_spent,
        total_spent_display: format_inr(total_spent),
        total_units: sum_units(projects, &["totalUnits", "units"]),
        sold_units: sum_units(projects, &["soldUnits"]),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentSummary {
    pub payments: Vec<Record>,
    pub total_paid: f64,
    pub total: f64,
    pub pending: f64,
    pub utilized_percent: f64,
    pub next_scheduled: Option<Record>,
}

fn amount(record: &Record) -> f64 {
    amount_or_zero(field_or_empty(record, &["amount"]))
}

/// Paid, pending and utilization figures for one project's payments
pub fn summarize_payments(payments: &[&Record]) -> PaymentSummary {
    let total: f64 = payments.iter().map(|p| amount(p)).sum();
    let total_paid: f64 = payments
        .iter()
        .filter(|p| status_is(p, "Paid"))
        .map(|p| amount(p))
        .sum();
    let utilized_percent = if total > 0.0 {
        total_paid / total * 100.0
    } else {
        0.0
    };

    PaymentSummary {
        payments: payments.iter().map(|p| (*p).clone()).collect(),
        total_paid,
        total,
        pending: total - total_paid,
        utilized_percent,
        next_scheduled: payments
            .iter()
            .find(|p| status_is(p, "Scheduled"))
            .map(|p| (*p).clone()),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SalesSummary {
    pub units: Vec<Record>,
    pub sold: usize,
    pub reserved: usize,
    pub available: usize,
    pub total: usize,
}

pub fn summarize_sales(units: &[&Record]) -> SalesSummary {
    SalesSummary {
        units: units.iter().map(|u| (*u).clone()).collect(),
        sold: count_status(units, "Sold"),
        reserved: count_status(units, "Reserved"),
        available: count_status(units, "Available"),
        total: units.len(),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum MaterialStatus {
    Complete,
    Pending,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MaterialLine {
    pub name: String,
    pub ordered: f64,
    pub received: f64,
    pub unit: String,
    pub status: MaterialStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MaterialSummary {
    pub items: Vec<MaterialLine>,
    pub complete: usize,
    pub pending: usize,
}

/// Ordered against received quantities; a line is complete once received
/// reaches ordered
pub fn summarize_materials(materials: &[&Record]) -> MaterialSummary {
    let items: Vec<MaterialLine> = materials
        .iter()
        .map(|m| {
            let ordered = quantity(field_or_empty(m, &["ordered"]));
            let received = quantity(field_or_empty(m, &["received"]));
            MaterialLine {
                name: field_or_empty(m, &["name", "material"]).to_string(),
                ordered,
                received,
                unit: field_or_empty(m, &["unit"]).to_string(),
                status: if received >= ordered {
                    MaterialStatus::Complete
                } else {
                    MaterialStatus::Pending
                },
            }
        })
        .collect();

    let complete = items
        .iter()
        .filter(|i| i.status == MaterialStatus::Complete)
        .count();

    MaterialSummary {
        pending: items.len() - complete,
        complete,
        items,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentEntry {
    pub id: String,
    pub name: String,
    pub category: String,
    pub required: bool,
    pub uploaded: bool,
    pub url: Option<String>,
    pub expiry: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentSummary {
    pub documents: Vec<DocumentEntry>,
    pub required: usize,
    pub uploaded: usize,
    pub missing_required: Vec<String>,
}

fn optional(record: &Record, aliases: &[&str]) -> Option<String> {
    field(record, aliases)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// Required and uploaded counts; rows without an id are skipped
pub fn summarize_documents(documents: &[&Record]) -> DocumentSummary {
    let documents: Vec<DocumentEntry> = documents
        .iter()
        .filter_map(|d| {
            let id = field(d, &["id", "docId"]).filter(|id| !id.is_empty())?;
            let category = field_or_empty(d, &["category"]);
            Some(DocumentEntry {
                id: id.to_string(),
                name: field_or_empty(d, &["name", "document"]).to_string(),
                category: (if category.is_empty() { "General" } else { category }).to_string(),
                required: parse_flag(field_or_empty(d, &["required"])),
                uploaded: parse_flag(field_or_empty(d, &["uploaded", "status"])),
                url: optional(d, &["url", "link"]),
                expiry: optional(d, &["expiry", "expires"]),
            })
        })
        .collect();

    DocumentSummary {
        required: documents.iter().filter(|d| d.required).count(),
        uploaded: documents.iter().filter(|d| d.uploaded).count(),
        missing_required: documents
            .iter()
            .filter(|d| d.required && !d.uploaded)
            .map(|d| d.name.clone())
            .collect(),
        documents,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InvoiceSummary {
    pub invoices: Vec<Record>,
    pub total_invoiced: f64,
    pub gst_collected: f64,
    pub paid: usize,
    pub count: usize,
}

pub fn summarize_invoices(invoices: &[&Record]) -> InvoiceSummary {
    InvoiceSummary {
        invoices: invoices.iter().map(|i| (*i).clone()).collect(),
        total_invoiced: invoices
            .iter()
            .map(|i| amount(i))
            .sum(),
        gst_collected: invoices
            .iter()
            .map(|i| amount_or_zero(field_or_empty(i, &["gst"])))
            .sum(),
        paid: count_status(invoices, "Paid"),
        count: invoices.len(),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SiteUpdate {
    pub id: String,
    pub date: String,
    pub caption: String,
    pub image: Option<String>,
}

/// Site updates carrying an id, newest first
///
/// Dates are `YYYY-MM-DD`; entries with unparsable dates sort last in
/// their original order.
pub fn site_updates(updates: &[&Record]) -> Vec<SiteUpdate> {
    let mut entries: Vec<SiteUpdate> = updates
        .iter()
        .filter_map(|u| {
            let id = field(u, &["id", "updateId"]).filter(|id| !id.is_empty())?;
            Some(SiteUpdate {
                id: id.to_string(),
                date: field_or_empty(u, &["date"]).to_string(),
                caption: field_or_empty(u, &["caption"]).to_string(),
                image: optional(u, &["img", "image"]),
            })
        })
        .collect();

    entries.sort_by_key(|u| std::cmp::Reverse(NaiveDate::parse_from_str(&u.date, "%Y-%m-%d").ok()));
    entries
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectDashboard {
    pub project: Record,
    pub contractors: Vec<String>,
    pub payments: PaymentSummary,
    pub sales: SalesSummary,
    pub materials: MaterialSummary,
    pub documents: DocumentSummary,
    pub invoices: InvoiceSummary,
    pub updates: Vec<SiteUpdate>,
}

/// Find a project row by its id column
pub fn find_project<'a>(projects: &'a [Record], id: &str) -> Option<&'a Record> {
    let id = id.trim();
    projects
        .iter()
        .find(|p| !id.is_empty() && field(p, &["id", "projectId"]) == Some(id))
}

/// Portfolio summary over the Projects tab
pub async fn portfolio<B: SheetsBackend>(store: &TabStore<B>) -> Result<PortfolioSummary> {
    let projects = store.read_or_empty(PROJECTS_TAB).await?;
    Ok(summarize_portfolio(&projects))
}

/// Every section of one project's dashboard
///
/// # Errors
/// * `ProjectNotFound` if no row of the Projects tab has this id
pub async fn project_dashboard<B: SheetsBackend>(
    store: &TabStore<B>,
    project_id: &str,
) -> Result<ProjectDashboard> {
    let projects = store.read_or_empty(PROJECTS_TAB).await?;
    let project = find_project(&projects, project_id)
        .cloned()
        .ok_or_else(|| ProxyError::ProjectNotFound(project_id.to_string()))?;
    let id = project_id.trim();

    let payments = store.read_or_empty(PAYMENTS_TAB).await?;
    let sales = store.read_or_empty(SALES_TAB).await?;
    let materials = store.read_or_empty(MATERIALS_TAB).await?;
    let documents = store.read_or_empty(DOCUMENTS_TAB).await?;
    let invoices = store.read_or_empty(INVOICES_TAB).await?;
    let updates = store.read_or_empty(UPDATES_TAB).await?;

    Ok(ProjectDashboard {
        contractors: to_list(field_or_empty(&project, &["contractors", "vendors"])),
        project,
        payments: summarize_payments(&filter_by_project(&payments, id)),
        sales: summarize_sales(&filter_by_project(&sales, id)),
        materials: summarize_materials(&filter_by_project(&materials, id)),
        documents: summarize_documents(&filter_by_project(&documents, id)),
        invoices: summarize_invoices(&filter_by_project(&invoices, id)),
        updates: site_updates(&filter_by_project(&updates, id)),
    })
}
