//! Business logic services

pub mod accrual;
pub mod borrowings;
pub mod catalog;
pub mod clock;
pub mod email;
pub mod fines;
pub mod notifications;
pub mod users;

use std::sync::Arc;

use crate::{config::LoansConfig, repository::LibraryStore};

/// Container for all services
#[derive(Clone)]
pub struct Services {
    pub catalog: catalog::CatalogService,
    pub users: users::UsersService,
    pub borrowings: borrowings::BorrowingsService,
    pub fines: fines::FinesService,
    pub notifications: notifications::NotificationService,
    pub accrual: accrual::AccrualEngine,
    pub clock: Arc<dyn clock::Clock>,
}

impl Services {
    /// Create all services over `store`, recording notifications in the store
    pub fn new(
        store: Arc<dyn LibraryStore>,
        clock: Arc<dyn clock::Clock>,
        loans: &LoansConfig,
        mailer: Arc<dyn email::Mailer>,
    ) -> Self {
        let notifier = Arc::new(notifications::StoreNotifier::new(store.clone(), clock.clone()));
        let notifications = notifications::NotificationService::new(store.clone(), notifier, mailer);
        Self::from_parts(store, clock, loans, notifications)
    }

    /// Create all services with an explicit notification emitter
    pub fn from_parts(
        store: Arc<dyn LibraryStore>,
        clock: Arc<dyn clock::Clock>,
        loans: &LoansConfig,
        notifications: notifications::NotificationService,
    ) -> Self {
        Self {
            catalog: catalog::CatalogService::new(store.clone(), clock.clone()),
            users: users::UsersService::new(store.clone(), clock.clone(), loans),
            borrowings: borrowings::BorrowingsService::new(
                store.clone(),
                clock.clone(),
                notifications.clone(),
                loans.clone(),
            ),
            fines: fines::FinesService::new(store.clone(), clock.clone(), notifications.clone()),
            accrual: accrual::AccrualEngine::new(store, clock.clone(), notifications.clone(), loans),
            notifications,
            clock,
        }
    }
}
