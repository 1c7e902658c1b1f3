//! In-memory content storage, for development and tests.

use std::collections::BTreeMap;
use std::sync::{Mutex, PoisonError};

use url::Url;
use uuid::Uuid;

use crate::mf2::Document;
use crate::slug;

use super::{ContentObject, ContentStore, Created, Error, Undeleted, Update};

pub struct MemoryStore {
    base: Url,
    objects: Mutex<BTreeMap<Url, ContentObject>>,
}

impl MemoryStore {
    pub fn new(base: Url) -> Self {
        Self {
            base,
            objects: Mutex::new(BTreeMap::new()),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<Url, ContentObject>> {
        self.objects.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl ContentStore for MemoryStore {
    fn exists_by_slug(&self, slug: &str) -> Result<bool, Error> {
        Ok(self
            .lock()
            .values()
            .any(|object| object.document.first_string(slug::PROPERTY) == Some(slug)))
    }

    fn create(&self, doc: Document) -> Result<Created, Error> {
        doc.validate()?;
        let url = super::object_url(&self.base, &format!("{}.json", Uuid::new_v4()))?;
        self.lock().insert(
            url.clone(),
            ContentObject {
                url: url.clone(),
                document: doc,
                deleted: false,
            },
        );

        Ok(Created {
            url,
            synchronous: true,
        })
    }

    fn update(&self, url: &Url, update: Update) -> Result<Url, Error> {
        let mut objects = self.lock();
        let object = objects
            .get_mut(url)
            .ok_or_else(|| Error::NotFound(url.clone()))?;

        let mut document = object.document.clone();
        update.apply(&mut document);
        document.validate()?;
        object.document = document;

        Ok(url.clone())
    }

    fn delete(&self, url: &Url) -> Result<(), Error> {
        let mut objects = self.lock();
        let object = objects
            .get_mut(url)
            .ok_or_else(|| Error::NotFound(url.clone()))?;
        object.deleted = true;

        Ok(())
    }

    fn undelete(&self, url: &Url) -> Result<Undeleted, Error> {
        let mut objects = self.lock();
        let object = objects
            .get_mut(url)
            .ok_or_else(|| Error::NotFound(url.clone()))?;
        object.deleted = false;

        Ok(Undeleted {
            url: url.clone(),
            moved: false,
        })
    }

    fn get(&self, url: &Url) -> Result<Option<ContentObject>, Error> {
        Ok(self.lock().get(url).cloned())
    }
}
