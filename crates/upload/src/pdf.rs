//! PDF page counting.
//!
//! Blocking adapter boundary around the PDF parser, with a hard upper
//! bound: exactly 1000 pages is accepted, 1001 is not.

use veil_protocol::MAX_PDF_PAGES;

use crate::{Result, UploadError};

/// Count pages, enforcing the bound.
pub async fn count_pages(bytes: Vec<u8>) -> Result<usize> {
    let pages = tokio::task::spawn_blocking(move || -> Result<usize> {
        let document = lopdf::Document::load_mem(&bytes)
            .map_err(|e| UploadError::Message(format!("pdf parse failed: {e}")))?;
        Ok(document.get_pages().len())
    })
    .await
    .map_err(|e| UploadError::Message(e.to_string()))??;

    if pages > MAX_PDF_PAGES {
        return Err(UploadError::TooManyPages {
            pages,
            limit: MAX_PDF_PAGES,
        });
    }
    Ok(pages)
}

/// Test fixture builder shared with the pipeline tests.
#[cfg(test)]
pub mod tests_support {
    /// Hand-assembled single-object-per-page PDF, enough for the
    /// parser's page tree walk.
    pub fn minimal_pdf(page_count: usize) -> Vec<u8> {
        let mut body = String::from("%PDF-1.4\n");
        let mut offsets = Vec::new();
        let mut kids = String::new();
        for i in 0..page_count {
            kids.push_str(&format!("{} 0 R ", 3 + i));
        }

        offsets.push(body.len());
        body.push_str("1 0 obj << /Type /Catalog /Pages 2 0 R >> endobj\n");

        offsets.push(body.len());
        body.push_str(&format!(
            "2 0 obj << /Type /Pages /Kids [ {kids}] /Count {page_count} >> endobj\n"
        ));

        for i in 0..page_count {
            offsets.push(body.len());
            body.push_str(&format!(
                "{} 0 obj << /Type /Page /Parent 2 0 R /MediaBox [0 0 612 792] >> endobj\n",
                3 + i
            ));
        }

        let xref_start = body.len();
        let size = offsets.len() + 1;
        body.push_str(&format!("xref\n0 {size}\n0000000000 65535 f \n"));
        for offset in &offsets {
            body.push_str(&format!("{offset:010} 00000 n \n"));
        }
        body.push_str(&format!(
            "trailer << /Size {size} /Root 1 0 R >>\nstartxref\n{xref_start}\n%%EOF"
        ));
        body.into_bytes()
    }
}

#[allow(clippy::unwrap_used)]
#[cfg(test)]
mod tests {
    use super::{tests_support::minimal_pdf, *};

    #[tokio::test]
    async fn counts_pages() {
        assert_eq!(count_pages(minimal_pdf(3)).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn garbage_is_rejected() {
        assert!(count_pages(vec![0u8; 32]).await.is_err());
    }
}
