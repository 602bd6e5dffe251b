use std::collections::HashMap;

use crate::store::Document;

/// Deduplicates documents by `_key`. A repeated key keeps the position of its
/// first occurrence and the contents of its last one. Documents without a
/// string `_key` are kept as-is. Returns the number of documents dropped.
pub fn dedup_by_key(documents: &mut Vec<Document>) -> usize {
    let before = documents.len();
    let mut positions: HashMap<String, usize> = HashMap::with_capacity(before);
    let mut out: Vec<Document> = Vec::with_capacity(before);

    for doc in documents.drain(..) {
        let key = doc.get("_key").and_then(|k| k.as_str()).map(str::to_string);
        match key {
            Some(key) => match positions.get(&key) {
                Some(&pos) => out[pos] = doc,
                None => {
                    positions.insert(key, out.len());
                    out.push(doc);
                }
            },
            None => out.push(doc),
        }
    }

    *documents = out;
    before - documents.len()
}

/// Splits `items` into chunks of at most `size` (a zero size is treated as 1).
pub fn chunked<T>(items: &[T], size: usize) -> impl Iterator<Item = &[T]> {
    items.chunks(size.max(1))
}
