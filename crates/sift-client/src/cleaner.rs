use std::sync::LazyLock;

use scraper::{ElementRef, Html, Selector};
use sift_core::error::AppError;
use sift_core::traits::Cleaner;

static STRIPPED: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("script, img, style, button, link").unwrap());
static BODY: LazyLock<Selector> = LazyLock::new(|| Selector::parse("body").unwrap());

/// Second-pass cleaner over serialized `<body>` markup.
///
/// Drops script/img/style/button/link elements, then removes every element
/// that has neither text nor element children, visiting children before
/// their parents so an emptied parent goes in the same walk. The result is
/// a fixed point: cleaning it again changes nothing. The output is the inner
/// markup of `<body>`.
#[derive(Debug, Clone, Copy, Default)]
pub struct DomPruner;

impl DomPruner {
    pub fn new() -> Self {
        Self
    }
}

/// Detach every element matching `selector`.
fn detach_all(document: &mut Html, selector: &Selector) {
    let ids: Vec<_> = document.select(selector).map(|e| e.id()).collect();
    for id in ids {
        if let Some(mut node) = document.tree.get_mut(id) {
            node.detach();
        }
    }
}

/// Detach empty elements under `<body>` in reverse document order.
fn prune_empty(document: &mut Html) -> usize {
    let Some(body) = document.select(&BODY).next() else {
        return 0;
    };
    let ids: Vec<_> = body
        .descendants()
        .skip(1)
        .filter(|node| node.value().is_element())
        .map(|node| node.id())
        .collect();

    let mut removed = 0;
    for id in ids.into_iter().rev() {
        let empty = document
            .tree
            .get(id)
            .and_then(ElementRef::wrap)
            .is_some_and(is_empty_element);
        if empty {
            if let Some(mut node) = document.tree.get_mut(id) {
                node.detach();
                removed += 1;
            }
        }
    }
    removed
}

fn is_empty_element(element: ElementRef<'_>) -> bool {
    let has_children = element.children().any(|c| c.value().is_element());
    !has_children && element.text().all(|t| t.trim().is_empty())
}

impl Cleaner for DomPruner {
    fn clean(&self, html: &str) -> Result<String, AppError> {
        let mut document = Html::parse_document(html);
        detach_all(&mut document, &STRIPPED);

        let removed = prune_empty(&mut document);
        tracing::trace!(removed, "Pruned empty elements");

        document
            .select(&BODY)
            .next()
            .map(|body| body.inner_html())
            .ok_or_else(|| AppError::CleanerError("document has no body".into()))
    }
}
