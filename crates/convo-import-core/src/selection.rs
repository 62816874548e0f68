//! Selection modes and the import-flow state machine.
//!
//! After a file is parsed and duplicates are marked, the user picks one of
//! three modes:
//!
//! - **Full** uploads the original file untouched. It is not subject to the
//!   selection cap.
//! - **Batch** takes a 1-based inclusive range over the non-duplicate
//!   conversations.
//! - **Selective** lets the user search, filter by date, and pick
//!   conversations one by one.
//!
//! Batch and selective imports send at most [`MAX_SELECTION`]
//! conversations.
//!
//! ```text
//! Idle ──FileParsed──▶ ModeSelection ──ChooseFull──────▶ UploadReady(FullFile)
//!                          │  ──ChooseBatch(ok)─▶ UploadReady(Conversations)
//!                          └─ChooseSelective─▶ Selective ──Confirm─▶ UploadReady
//! any ──Cancel / UploadFinished──▶ Idle
//! ```

use std::collections::HashSet;

use chrono::{DateTime, Duration, Utc};
use serde_json::Value;

use crate::error::SelectionError;
use crate::models::{ConversationPreview, ImportSummary};

/// Upper bound on conversations sent by one batch or selective import.
pub const MAX_SELECTION: usize = 500;

// ═══════════════════════════════════════════════════════════════════════
// Filters
// ═══════════════════════════════════════════════════════════════════════

/// Relative creation-date filter for the selective browser.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DateFilter {
    #[default]
    All,
    Last7Days,
    Last30Days,
}

impl DateFilter {
    /// Earliest `created_at` that passes the filter, if any.
    pub fn cutoff(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            DateFilter::All => None,
            DateFilter::Last7Days => Some(now - Duration::days(7)),
            DateFilter::Last30Days => Some(now - Duration::days(30)),
        }
    }
}

impl std::str::FromStr for DateFilter {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "all" => Ok(DateFilter::All),
            "7days" => Ok(DateFilter::Last7Days),
            "30days" => Ok(DateFilter::Last30Days),
            other => Err(format!(
                "unknown date filter '{}': expected all, 7days, or 30days",
                other
            )),
        }
    }
}

/// Search text plus date filter.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConversationFilter {
    pub query: String,
    pub date: DateFilter,
}

impl ConversationFilter {
    pub fn matches(&self, preview: &ConversationPreview, now: DateTime<Utc>) -> bool {
        let query = self.query.trim().to_lowercase();
        if !query.is_empty()
            && !preview.title.to_lowercase().contains(&query)
            && !preview.first_message_preview.to_lowercase().contains(&query)
        {
            return false;
        }
        match self.date.cutoff(now) {
            Some(cutoff) => preview.created_at >= cutoff,
            None => true,
        }
    }

    /// Previews passing the filter, in source order.
    pub fn apply<'a>(
        &self,
        previews: &'a [ConversationPreview],
        now: DateTime<Utc>,
    ) -> Vec<&'a ConversationPreview> {
        previews.iter().filter(|p| self.matches(p, now)).collect()
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Batch range
// ═══════════════════════════════════════════════════════════════════════

/// Check a 1-based inclusive range against the number of importable
/// (non-duplicate) conversations.
pub fn validate_batch_range(
    start: usize,
    end: usize,
    total_non_duplicate: usize,
) -> Result<(), SelectionError> {
    if start < 1 || end > total_non_duplicate {
        return Err(SelectionError::RangeOutOfBounds {
            total: total_non_duplicate,
        });
    }
    if start > end {
        return Err(SelectionError::StartAfterEnd);
    }
    let requested = end - start + 1;
    if requested > MAX_SELECTION {
        return Err(SelectionError::RangeTooLarge { requested });
    }
    Ok(())
}

/// The non-duplicate conversations in `[start, end]`, after validation.
pub fn batch_range<'a>(
    previews: &'a [ConversationPreview],
    start: usize,
    end: usize,
) -> Result<Vec<&'a ConversationPreview>, SelectionError> {
    let importable: Vec<&ConversationPreview> =
        previews.iter().filter(|p| !p.is_duplicate).collect();
    validate_batch_range(start, end, importable.len())?;
    Ok(importable[start - 1..end].to_vec())
}

// ═══════════════════════════════════════════════════════════════════════
// Selective set
// ═══════════════════════════════════════════════════════════════════════

/// Result of toggling one conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Toggle {
    Selected,
    Deselected,
}

/// Running selection for the selective browser. Never holds more than
/// [`MAX_SELECTION`] ids and never holds a duplicate.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SelectionState {
    selected: HashSet<String>,
    pub filter: ConversationFilter,
}

impl SelectionState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.selected.len()
    }

    pub fn is_empty(&self) -> bool {
        self.selected.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.selected.contains(id)
    }

    pub fn remaining(&self) -> usize {
        MAX_SELECTION.saturating_sub(self.selected.len())
    }

    /// Select or deselect the preview with local id `id`.
    ///
    /// Selecting past the cap fails with [`SelectionError::CapReached`] and
    /// leaves the current selection untouched.
    pub fn toggle(
        &mut self,
        previews: &[ConversationPreview],
        id: &str,
    ) -> Result<Toggle, SelectionError> {
        if self.selected.remove(id) {
            return Ok(Toggle::Deselected);
        }
        let preview = previews
            .iter()
            .find(|p| p.id == id)
            .ok_or_else(|| SelectionError::UnknownConversation(id.to_string()))?;
        if preview.is_duplicate {
            return Err(SelectionError::Duplicate(preview.conversation_id.clone()));
        }
        if self.selected.len() >= MAX_SELECTION {
            return Err(SelectionError::CapReached);
        }
        self.selected.insert(id.to_string());
        Ok(Toggle::Selected)
    }

    /// Select `id` without ever deselecting it. Returns `false` when it was
    /// already selected.
    ///
    /// Same checks as [`SelectionState::toggle`]: unknown ids, duplicates and
    /// a full selection are refused and leave the selection untouched.
    pub fn select(
        &mut self,
        previews: &[ConversationPreview],
        id: &str,
    ) -> Result<bool, SelectionError> {
        if self.selected.contains(id) {
            return Ok(false);
        }
        self.toggle(previews, id).map(|t| t == Toggle::Selected)
    }

    /// Add every visible non-duplicate preview that still fits under the cap.
    /// Returns how many were newly added.
    pub fn select_all_visible(
        &mut self,
        previews: &[ConversationPreview],
        now: DateTime<Utc>,
    ) -> usize {
        let mut added = 0;
        for preview in self.filter.apply(previews, now) {
            if self.selected.len() >= MAX_SELECTION {
                break;
            }
            if !preview.is_duplicate && self.selected.insert(preview.id.clone()) {
                added += 1;
            }
        }
        added
    }

    pub fn clear(&mut self) {
        self.selected.clear();
    }

    /// Selected previews in source order.
    pub fn selected_previews<'a>(
        &self,
        previews: &'a [ConversationPreview],
    ) -> Vec<&'a ConversationPreview> {
        previews
            .iter()
            .filter(|p| self.selected.contains(&p.id))
            .collect()
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Import flow
// ═══════════════════════════════════════════════════════════════════════

/// What the upload stage should send.
#[derive(Debug, Clone, PartialEq)]
pub enum UploadRequest {
    /// Upload the original file unchanged.
    FullFile,
    /// Send these raw conversations to the selective endpoint.
    Conversations(Vec<Value>),
}

/// Step of the import dialog flow.
#[derive(Debug, Clone, PartialEq)]
pub enum FlowState {
    Idle,
    ModeSelection,
    Selective(SelectionState),
    UploadReady(UploadRequest),
}

/// Input to [`ImportFlow::apply`].
#[derive(Debug, Clone, PartialEq)]
pub enum FlowEvent {
    /// Previews for a freshly parsed file, already duplicate-marked.
    FileParsed(Vec<ConversationPreview>),
    ChooseFull,
    ChooseBatch { start: usize, end: usize },
    ChooseSelective,
    Toggle(String),
    /// Select-only counterpart of `Toggle`. Already selected ids stay selected.
    Select(String),
    SelectAllVisible,
    ClearSelection,
    SetFilter(ConversationFilter),
    ConfirmSelection,
    /// Dialog closed before the upload began. Discards everything.
    Cancel,
    /// The upload stage is done with this file.
    UploadFinished,
}

/// Import dialog state machine. Holds the parsed previews from one file.
#[derive(Debug, Clone, PartialEq)]
pub struct ImportFlow {
    state: FlowState,
    previews: Vec<ConversationPreview>,
}

impl Default for ImportFlow {
    fn default() -> Self {
        Self::new()
    }
}

impl ImportFlow {
    pub fn new() -> Self {
        Self {
            state: FlowState::Idle,
            previews: Vec::new(),
        }
    }

    pub fn state(&self) -> &FlowState {
        &self.state
    }

    pub fn previews(&self) -> &[ConversationPreview] {
        &self.previews
    }

    pub fn summary(&self) -> ImportSummary {
        ImportSummary::from_previews(&self.previews)
    }

    /// Apply one event. On error the state is left exactly as it was.
    pub fn apply(&mut self, event: FlowEvent, now: DateTime<Utc>) -> Result<(), SelectionError> {
        let next = match (&mut self.state, event) {
            (_, FlowEvent::Cancel) | (_, FlowEvent::UploadFinished) => {
                self.previews.clear();
                FlowState::Idle
            }
            (FlowState::Idle, FlowEvent::FileParsed(previews)) => {
                self.previews = previews;
                FlowState::ModeSelection
            }
            (FlowState::ModeSelection, FlowEvent::ChooseFull) => {
                FlowState::UploadReady(UploadRequest::FullFile)
            }
            (FlowState::ModeSelection, FlowEvent::ChooseBatch { start, end }) => {
                let picked = batch_range(&self.previews, start, end)?;
                if picked.is_empty() {
                    return Err(SelectionError::Empty);
                }
                FlowState::UploadReady(UploadRequest::Conversations(
                    picked.into_iter().map(|p| p.raw_data.clone()).collect(),
                ))
            }
            (FlowState::ModeSelection, FlowEvent::ChooseSelective) => {
                FlowState::Selective(SelectionState::new())
            }
            (FlowState::Selective(sel), FlowEvent::Toggle(id)) => {
                sel.toggle(&self.previews, &id)?;
                return Ok(());
            }
            (FlowState::Selective(sel), FlowEvent::Select(id)) => {
                sel.select(&self.previews, &id)?;
                return Ok(());
            }
            (FlowState::Selective(sel), FlowEvent::SelectAllVisible) => {
                sel.select_all_visible(&self.previews, now);
                return Ok(());
            }
            (FlowState::Selective(sel), FlowEvent::ClearSelection) => {
                sel.clear();
                return Ok(());
            }
            (FlowState::Selective(sel), FlowEvent::SetFilter(filter)) => {
                sel.filter = filter;
                return Ok(());
            }
            (FlowState::Selective(sel), FlowEvent::ConfirmSelection) => {
                if sel.is_empty() {
                    return Err(SelectionError::Empty);
                }
                let raw = sel
                    .selected_previews(&self.previews)
                    .into_iter()
                    .map(|p| p.raw_data.clone())
                    .collect();
                FlowState::UploadReady(UploadRequest::Conversations(raw))
            }
            _ => return Err(SelectionError::WrongStep),
        };
        self.state = next;
        Ok(())
    }
}
