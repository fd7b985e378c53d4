//! Page compositor: stamps a one-page overlay onto the first page of a base
//! document. The overlay page becomes a Form XObject painted on top of the
//! base page's existing content; every other page passes through untouched.

use crate::error::{FormError, Result};
use crate::types::Size;
use lopdf::{Dictionary, Document as LoDocument, Object as LoObject, ObjectId, Stream as LoStream, dictionary};

const OVERLAY_XOBJECT_PREFIX: &str = "FsOverlay";

/// Page tree nesting deeper than this is treated as a cycle.
const MAX_TREE_DEPTH: usize = 32;

/// Looks `key` up on the page, then on each `/Pages` ancestor, the way
/// `/Resources`, `/MediaBox` and `/CropBox` are inherited.
pub(crate) fn inherited_attribute<'a>(
    doc: &'a LoDocument,
    page: &'a Dictionary,
    key: &[u8],
) -> Option<&'a LoObject> {
    let mut node = page;
    for _ in 0..MAX_TREE_DEPTH {
        if let Ok(value) = node.get(key) {
            return match value {
                LoObject::Reference(id) => doc.get_object(*id).ok(),
                other => Some(other),
            };
        }
        let parent = node.get(b"Parent").and_then(LoObject::as_reference).ok()?;
        node = doc.get_object(parent).and_then(LoObject::as_dict).ok()?;
    }
    None
}

fn page_box(doc: &LoDocument, page: &Dictionary) -> Vec<LoObject> {
    for key in [b"CropBox".as_slice(), b"MediaBox"] {
        if let Some(arr) = inherited_attribute(doc, page, key).and_then(|o| o.as_array().ok()) {
            return arr.clone();
        }
    }
    vec![0.into(), 0.into(), 595.into(), 842.into()]
}

fn resolve_dict(doc: &LoDocument, obj: Option<&LoObject>) -> Dictionary {
    match obj {
        Some(LoObject::Dictionary(d)) => d.clone(),
        Some(LoObject::Reference(id)) => doc
            .get_object(*id)
            .ok()
            .and_then(|o| o.as_dict().ok())
            .cloned()
            .unwrap_or_default(),
        _ => Dictionary::new(),
    }
}

/// A copy of the page's effective resources, inherited ones included.
fn page_resources(doc: &LoDocument, page: &Dictionary) -> Dictionary {
    resolve_dict(doc, inherited_attribute(doc, page, b"Resources"))
}

fn unused_xobject_name(xobjects: &Dictionary) -> String {
    let mut n = 1usize;
    loop {
        let name = format!("{OVERLAY_XOBJECT_PREFIX}{n}");
        if !xobjects.has(name.as_bytes()) {
            return name;
        }
        n += 1;
    }
}

fn first_page_id(doc: &LoDocument) -> Option<ObjectId> {
    doc.get_pages().into_values().next()
}

pub fn load_document(bytes: &[u8], role: &str) -> Result<LoDocument> {
    let doc = LoDocument::load_mem(bytes)
        .map_err(|err| FormError::InvalidDocument(format!("{role} document: {err}")))?;
    if doc.is_encrypted() {
        return Err(FormError::InvalidDocument(format!("{role} document is encrypted")));
    }
    Ok(doc)
}

pub fn page_count(bytes: &[u8]) -> Result<usize> {
    Ok(load_document(bytes, "base")?.get_pages().len())
}

/// Visible size of the first page (CropBox, else MediaBox).
pub fn first_page_size(doc: &LoDocument) -> Option<Size> {
    let page = doc.get_object(first_page_id(doc)?).ok()?.as_dict().ok()?;
    let corners: Vec<f32> = page_box(doc, page)
        .iter()
        .filter_map(|v| v.as_float().ok())
        .collect();
    let [x0, y0, x1, y1] = corners.as_slice() else {
        return None;
    };
    Some(Size::new((x1 - x0).abs(), (y1 - y0).abs()))
}

/// Merges `overlay`'s first page onto `base`'s first page. A base without
/// pages is returned as is.
pub fn compose_documents(mut base: LoDocument, mut overlay: LoDocument) -> Result<LoDocument> {
    let Some(target_page_id) = first_page_id(&base) else {
        log::debug!("base document has no pages; nothing to compose");
        return Ok(base);
    };

    overlay.renumber_objects_with(base.max_id + 1);
    let overlay_page_id = first_page_id(&overlay)
        .ok_or_else(|| FormError::InvalidDocument("overlay document has no pages".to_string()))?;
    base.max_id = base.max_id.max(overlay.max_id);
    base.objects.extend(overlay.objects);

    let overlay_page = base.get_object(overlay_page_id)?.as_dict()?.clone();
    let overlay_content = base.get_page_content(overlay_page_id)?;
    let form_stream = LoStream::new(
        dictionary! {
            "Type" => "XObject",
            "Subtype" => "Form",
            "FormType" => 1,
            "BBox" => LoObject::Array(page_box(&base, &overlay_page)),
            "Resources" => LoObject::Dictionary(page_resources(&base, &overlay_page)),
        },
        overlay_content,
    );
    let form_id = base.add_object(form_stream);

    let target_page = base.get_object(target_page_id)?.as_dict()?.clone();
    // Written back onto the page itself, so inherited entries must be copied in.
    let mut resources = page_resources(&base, &target_page);
    let mut xobjects = resolve_dict(&base, resources.get(b"XObject").ok());
    let form_name = unused_xobject_name(&xobjects);
    xobjects.set(form_name.as_bytes().to_vec(), LoObject::Reference(form_id));
    resources.set("XObject", LoObject::Dictionary(xobjects));
    base.get_object_mut(target_page_id)?
        .as_dict_mut()?
        .set("Resources", LoObject::Dictionary(resources));

    // Base content may leave the graphics state dirty, so isolate it first.
    base.add_page_contents(target_page_id, format!("q 1 0 0 1 0 0 cm /{form_name} Do Q\n").into_bytes())?;
    wrap_existing_contents(&mut base, target_page_id)?;

    base.prune_objects();
    base.renumber_objects();
    base.compress();
    Ok(base)
}

/// Prepends a `q` stream so the stamp's trailing `Q` restores a clean state
/// no matter what the original content left on the stack.
fn wrap_existing_contents(doc: &mut LoDocument, page_id: ObjectId) -> Result<()> {
    let open = doc.add_object(LoStream::new(dictionary! {}, b"q\n".to_vec()));
    let close = doc.add_object(LoStream::new(dictionary! {}, b"\nQ\n".to_vec()));
    let page = doc.get_object_mut(page_id)?.as_dict_mut()?;
    let mut contents = match page.get(b"Contents") {
        Ok(LoObject::Array(items)) => items.clone(),
        Ok(LoObject::Reference(id)) => vec![LoObject::Reference(*id)],
        _ => Vec::new(),
    };
    let Some(stamp) = contents.pop() else {
        return Ok(());
    };
    let mut wrapped = Vec::with_capacity(contents.len() + 4);
    wrapped.push(LoObject::Reference(open));
    wrapped.extend(contents);
    wrapped.push(LoObject::Reference(close));
    wrapped.push(stamp);
    page.set("Contents", LoObject::Array(wrapped));
    Ok(())
}

/// Byte-level entry point. A base with zero pages comes back byte-identical.
pub fn compose(base: &[u8], overlay: &[u8]) -> Result<Vec<u8>> {
    let base_doc = load_document(base, "base")?;
    if base_doc.get_pages().is_empty() {
        return Ok(base.to_vec());
    }
    let overlay_doc = load_document(overlay, "overlay")?;
    let mut merged = compose_documents(base_doc, overlay_doc)?;
    let mut out = Vec::new();
    merged.save_to(&mut out)?;
    Ok(out)
}
