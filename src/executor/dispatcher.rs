//! Action dispatcher: resolves element references and drives the actuator
//! through the coordinate -> locator -> blind fallback chain.
use std::time::Duration;

use crate::agent_engine::history::ArtifactStore;
use crate::agent_engine::proposal::{ProposedAction, TargetParams};
use crate::errors::{MarksmanError, MarksmanResult};
use crate::executor::actuator::{Actuator, ClickTarget};
use crate::executor::resolver::{ActionResolver, Resolution, TargetKind};
use crate::perception::types::{FilteredElementSet, Point};

/// What happened when an action was executed.
#[derive(Debug, Clone, Default)]
pub struct DispatchOutcome {
    /// Set when every route of the fallback chain failed.
    pub error: Option<String>,
    /// Audit screenshot file names, in capture order.
    pub artifacts: Vec<String>,
    /// Index-free description for the oracle's history.
    pub summary: String,
}

pub struct ActionDispatcher {
    resolver: ActionResolver,
    audit_delay: Duration,
    scroll_amount: u32,
}

impl ActionDispatcher {
    pub fn new(resolver: ActionResolver, audit_delay: Duration, scroll_amount: u32) -> Self {
        Self {
            resolver,
            audit_delay,
            scroll_amount,
        }
    }

    pub async fn execute(
        &self,
        actuator: &mut dyn Actuator,
        action: &ProposedAction,
        elements: &FilteredElementSet,
        step: u32,
        store: &ArtifactStore,
    ) -> DispatchOutcome {
        let mut out = DispatchOutcome::default();
        let result = match action {
            ProposedAction::Click(p) => self.click(actuator, p, elements, step, store, &mut out).await,
            ProposedAction::Type(p) => self.type_text(actuator, p, elements, step, store, &mut out).await,
            ProposedAction::Press(p) => {
                out.summary = format!("pressed {}", p.key);
                actuator.press_key(&p.key).await
            }
            ProposedAction::Scroll(p) => {
                let amount = p.amount.unwrap_or(self.scroll_amount);
                out.summary = format!("scrolled {:?} {amount}px", p.direction).to_lowercase();
                actuator.scroll(p.direction, amount).await
            }
            ProposedAction::Navigate(p) => {
                out.summary = format!("navigated to {}", p.url);
                actuator.navigate(&p.url).await
            }
            ProposedAction::Finish(_) | ProposedAction::Fail(_) => {
                out.summary = action.kind().to_string();
                Ok(())
            }
        };

        if let Err(e) = result {
            tracing::warn!(step, action = action.kind(), error = %e, "action failed");
            out.summary.push_str(" (failed)");
            out.error = Some(e.to_string());
        }
        out
    }

    async fn click(
        &self,
        actuator: &mut dyn Actuator,
        params: &TargetParams,
        elements: &FilteredElementSet,
        step: u32,
        store: &ArtifactStore,
        out: &mut DispatchOutcome,
    ) -> MarksmanResult<()> {
        let resolution = self.resolver.resolve(TargetKind::Click, params, elements);
        out.summary = describe("clicked", &resolution, params, elements);

        match resolution {
            Resolution::Element(r) => {
                tracing::info!(step, index = r.index, x = r.point.x, y = r.point.y, "clicking element");
                self.mark_target(actuator, r.point, step, store, out).await;

                if let Err(e) = actuator.click(&ClickTarget::Point(r.point)).await {
                    tracing::warn!(step, error = %e, "coordinate click failed, trying locator");
                    let selector = params.selector.as_deref().filter(|s| !s.trim().is_empty());
                    let text = params.text.as_deref().filter(|s| !s.trim().is_empty());
                    if selector.is_none() && text.is_none() {
                        return Err(e);
                    }
                    click_locator(actuator, selector, text).await?;
                }
            }
            Resolution::Locator { selector, text } => {
                click_locator(actuator, selector.as_deref(), text.as_deref()).await?;
            }
            Resolution::PassThrough => {
                tracing::info!(step, "no usable target, clicking focused element");
                actuator.click(&ClickTarget::Focused).await?;
            }
        }

        tokio::time::sleep(self.audit_delay).await;
        self.audit_shot(actuator, step, "click_result", store, out).await;
        Ok(())
    }

    async fn type_text(
        &self,
        actuator: &mut dyn Actuator,
        params: &TargetParams,
        elements: &FilteredElementSet,
        step: u32,
        store: &ArtifactStore,
        out: &mut DispatchOutcome,
    ) -> MarksmanResult<()> {
        let text = params.text.as_deref().unwrap_or_default();
        let resolution = self.resolver.resolve(TargetKind::Type, params, elements);
        out.summary = format!("typed '{text}'");
        if let Resolution::Element(r) = &resolution {
            if let Some(el) = elements.get(r.index) {
                out.summary.push_str(&format!(" into {}", target_label(el)));
            }
        }
        if text.is_empty() {
            return Err(MarksmanError::Actuator("type action without text".into()));
        }

        match resolution {
            Resolution::Element(r) => {
                tracing::info!(step, index = r.index, x = r.point.x, y = r.point.y, "focusing element before typing");
                self.mark_target(actuator, r.point, step, store, out).await;
                match actuator.click(&ClickTarget::Point(r.point)).await {
                    Ok(()) => {
                        tokio::time::sleep(self.audit_delay).await;
                        actuator.type_text(text, None).await?;
                    }
                    Err(e) => {
                        tracing::warn!(step, error = %e, "focus click failed, typing via selector");
                        let selector = params.selector.as_deref().filter(|s| !s.trim().is_empty());
                        actuator.type_text(text, selector).await?;
                    }
                }
            }
            Resolution::Locator { selector, .. } => {
                actuator.type_text(text, selector.as_deref()).await?;
            }
            Resolution::PassThrough => {
                actuator.type_text(text, None).await?;
            }
        }

        tokio::time::sleep(self.audit_delay).await;
        self.audit_shot(actuator, step, "type_result", store, out).await;
        Ok(())
    }

    /// Cursor dot at the resolved point, captured before the click lands.
    async fn mark_target(
        &self,
        actuator: &mut dyn Actuator,
        point: Point,
        step: u32,
        store: &ArtifactStore,
        out: &mut DispatchOutcome,
    ) {
        if let Err(e) = actuator.show_transient_cursor(point).await {
            tracing::debug!(error = %e, "cursor marker not shown");
        }
        self.audit_shot(actuator, step, "cursor", store, out).await;
    }

    async fn audit_shot(
        &self,
        actuator: &mut dyn Actuator,
        step: u32,
        label: &str,
        store: &ArtifactStore,
        out: &mut DispatchOutcome,
    ) {
        let saved = match actuator.capture_screenshot().await {
            Ok(png) => {
                let name = ArtifactStore::screenshot_name(step, Some(label));
                store.save_png(&name, &png).map(|_| name)
            }
            Err(e) => Err(e),
        };
        match saved {
            Ok(name) => out.artifacts.push(name),
            Err(e) => tracing::warn!(step, label, error = %e, "audit screenshot skipped"),
        }
    }
}

async fn click_locator(
    actuator: &mut dyn Actuator,
    selector: Option<&str>,
    text: Option<&str>,
) -> MarksmanResult<()> {
    if let Some(sel) = selector {
        match actuator.click(&ClickTarget::Selector(sel.to_string())).await {
            Ok(()) => return Ok(()),
            Err(e) if text.is_some() => {
                tracing::warn!(selector = sel, error = %e, "selector click failed, trying text");
            }
            Err(e) => return Err(e),
        }
    }
    match text {
        Some(t) => actuator.click(&ClickTarget::Text(t.to_string())).await,
        None => Err(MarksmanError::Actuator("no selector or text to locate".into())),
    }
}

fn target_label(el: &crate::perception::types::ElementRecord) -> String {
    let name = [Some(el.text.as_str()), el.aria_label.as_deref(), el.placeholder.as_deref()]
        .into_iter()
        .flatten()
        .find(|s| !s.trim().is_empty());
    match name {
        Some(n) => format!("'{n}'"),
        None => format!("a {}", el.tag_name),
    }
}

fn describe(
    verb: &str,
    resolution: &Resolution,
    params: &TargetParams,
    elements: &FilteredElementSet,
) -> String {
    match resolution {
        Resolution::Element(r) => match elements.get(r.index) {
            Some(el) => format!("{verb} {}", target_label(el)),
            None => verb.to_string(),
        },
        Resolution::Locator { selector, text } => match (text, selector) {
            (Some(t), _) => format!("{verb} '{t}'"),
            (None, Some(s)) => format!("{verb} {s}"),
            (None, None) => verb.to_string(),
        },
        Resolution::PassThrough => match params.text.as_deref() {
            Some(t) if !t.trim().is_empty() => format!("{verb} focused element (wanted '{t}')"),
            _ => format!("{verb} focused element"),
        },
    }
}
