/*!
# sheetdesk

A spreadsheet-tab data proxy for a construction project dashboard, built in Rust.

## Overview

The data store is a Google Sheets spreadsheet. Each tab (Projects, Payments,
Sales, Materials, Documents, Invoices, Updates, ...) holds one kind of record,
with the first row as the header row. The proxy authenticates to the
spreadsheet API, reads a tab into header-keyed records and appends, updates or
deletes rows on behalf of dashboard consumers.

## Architecture

### Backend Layer
- **Technologies**: Rust, axum, reqwest, openssl
- **Core Components**:
  - Credential Exchange - Signs RS256 assertions and caches bearer tokens
  - Tab Store - Reads tabs into records, appends and updates rows by id
  - Sheets Backends - Google Sheets v4 REST client and an in-memory store
  - Schema Registry - Optional per-tab field types and required fields
  - Dashboard Summaries - Portfolio and per-project figures

### Consumer Layer
- Tab Cache - Deduplicated, shared tab loads with stale-on-error data
- Proxy Client - HTTP client for a running proxy
- Row Commands - Validated append/update/delete requests

## Modules

- **auth**: Service-account assertions, API keys and the token cache
- **sheets**: Backend trait and A1 range helpers
- **google**: Google Sheets v4 backend
- **memory**: In-memory backend for demo mode and tests
- **record**: Rows to records and back, JSON body coercion
- **store**: Tab reads and serialized, re-verified writes
- **schema**: Optional TOML schemas checked before writes
- **cache**: Consumer-side cache, proxy client and row commands
- **currency**: Rupee amounts (`₹1.5 Cr`, `₹50 L`, `₹8,00,000`)
- **normalize**: Header aliases, flags and list cells
- **dashboard**: Portfolio and project summaries
- **config**: Command-line and environment configuration
- **app**: Routing and middleware

## REST API Endpoints

- `GET /api/sheets/{tab}` - Records of a tab
- `POST /api/sheets/{tab}` - Append a row
- `PUT /api/sheets/{tab}` - Update the row with the body's `id`
- `DELETE /api/sheets/{tab}?id=...` - Delete the row with that id
- `GET /api/portfolio` - Portfolio summary
- `GET /api/projects/{id}/dashboard` - One project's dashboard
- `GET /api/health` - Liveness check
*/

pub mod auth;
pub mod cache;
pub mod config;
pub mod currency;
pub mod dashboard;
pub mod error;
pub mod google;
pub mod memory;
pub mod normalize;
pub mod record;
pub mod schema;
pub mod sheets;
pub mod store;

#[cfg(feature = "server")]
pub mod app;

pub use error::{ProxyError, Result};
