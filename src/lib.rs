/*!
# Insight

A small web service that turns a CSV export of social-media post metrics into
an AI-written account diagnostic report.

## Overview

A visitor pastes an access code, enters an email address, and uploads the
post export. The service parses the rows, computes a headline summary,
asks a hosted text-generation model for a Markdown report, shows it on the
page, offers it as a download, and emails a copy when SMTP is configured.

Entering the administrator password instead of an access code unlocks a
generator for new batches of access codes.

## Flow

1. `access` checks the submitted code (exact, case-sensitive membership)
2. `posts` parses the CSV and computes median likes, tier, and top posts
3. `prompt` turns the first 200 rows into the analyst prompt
4. `generator` calls the model, retrying rate-limited or busy responses
5. `session` records the finished report for display and download
6. `mailer` sends a copy; a mail failure never hides the report

## Modules

- **access**: access-code set, admin password check, code batches
- **posts**: CSV parsing, likes normalization, summary statistics
- **prompt**: analyst prompt construction
- **generator**: Gemini client and retry policy
- **mailer**: report email over SMTP
- **session**: per-visitor form state
- **config**: environment configuration
- **app**: routing and handlers

## Endpoints

- `GET /` - Form, report, or admin page depending on session stage
- `POST /analyze` - Multipart form submission (`code`, `email`, `file`)
- `GET /report.md` - Download the finished report
- `POST /reset` - Back to the empty form
- `POST /admin/codes` - Generate a batch of access codes
*/

pub mod access;
pub mod posts;
pub mod prompt;

#[cfg(feature = "web")]
pub mod app;
#[cfg(feature = "web")]
pub mod config;
#[cfg(feature = "web")]
pub mod generator;
#[cfg(feature = "web")]
pub mod mailer;
#[cfg(feature = "web")]
pub mod session;

pub use access::{Access, AccessCodes};
pub use posts::{Post, Summary, Tier};
