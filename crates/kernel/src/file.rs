// Open-file handles. The on-disk filesystem is someone else's
// problem; the only device here is the console, which is enough
// to make fork's descriptor duplication and exit's close-on-drop
// real. The last clone dropping a handle is the close.

use alloc::sync::Arc;

#[derive(Debug, Clone)]
pub struct File {
    inner: Arc<FileInner>,
}

#[derive(Debug)]
struct FileInner {
    kind: FileKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FileKind {
    Console,
}

impl File {
    pub fn console() -> Self {
        Self {
            inner: Arc::new(FileInner {
                kind: FileKind::Console,
            }),
        }
    }

    pub fn dup(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }

    pub fn is_console(&self) -> bool {
        self.inner.kind == FileKind::Console
    }
}
