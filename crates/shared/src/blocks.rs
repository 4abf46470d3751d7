use serde::{Deserialize, Serialize};

use crate::{
    domain::BlockId,
    error::{ApiError, ErrorCode},
    state::CounterState,
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TextObject {
    PlainText { text: String },
    Markdown { text: String },
}

impl TextObject {
    pub fn plain(text: impl Into<String>) -> Self {
        Self::PlainText { text: text.into() }
    }

    pub fn markdown(text: impl Into<String>) -> Self {
        Self::Markdown { text: text.into() }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionId {
    Increment,
    Decrement,
}

/// Rendering contexts a conditional group can be restricted to. The
/// predicate is evaluated by the surface at render time, never by the
/// server after send.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Surface {
    Channel,
    Livechat,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Element {
    Button {
        text: TextObject,
        action_id: ActionId,
        value: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenderWhen {
    pub surfaces: Vec<Surface>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Block {
    Section {
        text: TextObject,
    },
    Actions {
        block_id: BlockId,
        elements: Vec<Element>,
    },
    Conditional {
        render_when: RenderWhen,
        blocks: Vec<Block>,
    },
}

/// Builds the counter message tree: three always-visible sections followed
/// by one livechat-only conditional group holding the increment/decrement
/// buttons. Each button value carries the post-delta counter so the state
/// survives the round trip without server-side session storage.
pub fn counter_blocks(counter: i64, block_id: &BlockId) -> Result<Vec<Block>, ApiError> {
    if block_id.is_empty() {
        return Err(ApiError::new(
            ErrorCode::Validation,
            "block id cannot be empty",
        ));
    }

    let increment = CounterState::new(counter + 1).encode()?;
    let decrement = CounterState::new(counter - 1).encode()?;

    Ok(vec![
        Block::Section {
            text: TextObject::markdown("The following is a common block you can see everywhere"),
        },
        Block::Section {
            text: TextObject::plain(format!("Button interacted with {counter} times")),
        },
        Block::Section {
            text: TextObject::markdown(
                "*But the next one is only visible in the livechat widget! :scream: *",
            ),
        },
        Block::Conditional {
            render_when: RenderWhen {
                surfaces: vec![Surface::Livechat],
            },
            blocks: vec![Block::Actions {
                block_id: block_id.clone(),
                elements: vec![
                    Element::Button {
                        text: TextObject::plain("Increment Counter"),
                        action_id: ActionId::Increment,
                        value: increment,
                    },
                    Element::Button {
                        text: TextObject::plain("Decrement Counter"),
                        action_id: ActionId::Decrement,
                        value: decrement,
                    },
                ],
            }],
        },
    ])
}

/// Applies the engine-visibility filter the way a rendering surface does:
/// a conditional group's body is inlined when the surface matches and
/// dropped otherwise.
pub fn visible_blocks(blocks: &[Block], surface: Surface) -> Vec<Block> {
    let mut out = Vec::with_capacity(blocks.len());
    for block in blocks {
        match block {
            Block::Conditional {
                render_when,
                blocks,
            } => {
                if render_when.surfaces.contains(&surface) {
                    out.extend(visible_blocks(blocks, surface));
                }
            }
            other => out.push(other.clone()),
        }
    }
    out
}
