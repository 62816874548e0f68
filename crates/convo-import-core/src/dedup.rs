//! Duplicate marking against the destination's existing conversations.

use std::collections::HashSet;

use crate::models::ConversationPreview;

/// Flag every preview whose source conversation id already exists at the
/// destination. Runs once per parse, before any selection happens.
pub fn mark_duplicates(
    previews: Vec<ConversationPreview>,
    existing_ids: &HashSet<String>,
) -> Vec<ConversationPreview> {
    previews
        .into_iter()
        .map(|preview| ConversationPreview {
            is_duplicate: existing_ids.contains(&preview.conversation_id),
            ..preview
        })
        .collect()
}
