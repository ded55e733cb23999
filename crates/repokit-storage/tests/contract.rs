//! Behavior every backend must share, run against all three.

use serde::{Deserialize, Serialize};
use tempfile::TempDir;

use repokit_storage::{
    FileRepository, IndexFactory, MemoryRepository, Repository, RepositoryError, Result,
    SequentialIndex, SqliteRepository,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Account {
    owner: String,
    balance: i64,
}

fn account(owner: &str, balance: i64) -> Account {
    Account {
        owner: owner.to_string(),
        balance,
    }
}

/// A backend under test plus whatever must outlive it.
struct Fixture<Repo> {
    repo: Repo,
    _dir: Option<TempDir>,
}

fn memory(factory: impl IndexFactory<u64> + 'static) -> Fixture<MemoryRepository<u64, Account>> {
    Fixture {
        repo: MemoryRepository::new(factory),
        _dir: None,
    }
}

fn file(factory: impl IndexFactory<u64> + 'static) -> Fixture<FileRepository<u64, Account>> {
    let dir = tempfile::tempdir().unwrap();
    let repo = FileRepository::new(dir.path().join("accounts.json"), factory);
    Fixture {
        repo,
        _dir: Some(dir),
    }
}

fn sqlite(factory: impl IndexFactory<u64> + 'static) -> Fixture<SqliteRepository<u64, Account>> {
    let dir = tempfile::tempdir().unwrap();
    let repo = SqliteRepository::new(dir.path().join("accounts.db"), factory).unwrap();
    Fixture {
        repo,
        _dir: Some(dir),
    }
}

fn seed<Repo: Repository<u64, Account>>(repo: &Repo, accounts: &[Account]) {
    repo.start_work(|work| -> Result<()> {
        for acct in accounts {
            work.add(acct)?;
        }
        work.commit()
    })
    .unwrap();
}

fn check_commit_round_trip<Repo: Repository<u64, Account>>(repo: &Repo) {
    seed(repo, &[account("ada", 10), account("bob", 20), account("cy", 30)]);

    repo.start_work(|work| -> Result<()> {
        work.set(&2, &account("bob", 25))?;
        work.delete(&1)?;
        let index = work.add(&account("dee", 40))?;
        assert_eq!(index, 4);
        work.commit()
    })
    .unwrap();

    assert_eq!(
        repo.all_items().unwrap(),
        vec![
            (2, account("bob", 25)),
            (3, account("cy", 30)),
            (4, account("dee", 40)),
        ]
    );
    assert_eq!(repo.len().unwrap(), 3);
    assert!(!repo.contains_key(&1).unwrap());
    let keys: Vec<u64> = repo.keys().unwrap().collect::<Result<_>>().unwrap();
    assert_eq!(keys, vec![2, 3, 4]);
    let total: i64 = repo
        .values()
        .unwrap()
        .map(|acct| acct.map(|a| a.balance))
        .sum::<Result<i64>>()
        .unwrap();
    assert_eq!(total, 95);
}

fn check_failed_work_discards_changes<Repo: Repository<u64, Account>>(repo: &Repo) {
    seed(repo, &[account("ada", 10), account("bob", 20)]);
    let before = repo.all_items().unwrap();

    let err = repo
        .start_work(|work| -> Result<()> {
            work.set(&2, &account("bob", 0))?;
            work.add(&account("eve", 1_000))?;
            work.get(&99)?;
            work.commit()
        })
        .unwrap_err();

    assert!(matches!(err, RepositoryError::NotFound { .. }));
    assert_eq!(repo.all_items().unwrap(), before);
}

fn check_explicit_rollback<Repo: Repository<u64, Account>>(repo: &Repo) {
    seed(repo, &[account("ada", 10)]);

    repo.start_work(|work| -> Result<()> {
        work.set(&1, &account("ada", 11))?;
        work.commit()?;
        work.set(&1, &account("ada", 12))?;
        work.rollback()?;
        assert_eq!(work.get(&1)?, account("ada", 11));
        Ok(())
    })
    .unwrap();

    assert_eq!(repo.get(&1).unwrap(), account("ada", 11));
}

fn check_missing_index_errors<Repo: Repository<u64, Account>>(repo: &Repo) {
    seed(repo, &[account("ada", 10)]);

    match repo.get(&7).unwrap_err() {
        RepositoryError::KeyNotFound { index } => assert_eq!(index, "7"),
        other => panic!("expected KeyNotFound, got: {:?}", other),
    }
    assert_eq!(repo.try_get(&7).unwrap(), None);

    repo.start_work(|work| -> Result<()> {
        assert!(matches!(work.get(&7), Err(RepositoryError::NotFound { .. })));
        assert!(matches!(
            work.set(&7, &account("zed", 0)),
            Err(RepositoryError::NotFound { .. })
        ));
        assert!(matches!(work.delete(&7), Err(RepositoryError::NotFound { .. })));
        assert_eq!(work.len()?, 1);
        assert!(work.contains(&1)?);
        assert!(!work.is_empty()?);
        Ok(())
    })
    .unwrap();
}

fn check_multiple_commits<Repo: Repository<u64, Account>>(repo: &Repo) {
    repo.start_work(|work| -> Result<()> {
        work.add(&account("ada", 1))?;
        work.commit()?;
        work.add(&account("bob", 2))?;
        work.commit()?;
        work.add(&account("cy", 3))?;
        Ok(())
    })
    .unwrap();

    assert_eq!(repo.len().unwrap(), 2);
    assert!(repo.contains_key(&2).unwrap());
    assert!(!repo.contains_key(&3).unwrap());
}

fn check_entries_are_restartable<Repo: Repository<u64, Account>>(repo: &Repo) {
    seed(repo, &[account("ada", 10), account("bob", 20)]);

    repo.start_work(|work| -> Result<()> {
        let first: Vec<(u64, Account)> = work.entries()?.collect::<Result<_>>()?;
        work.delete(&1)?;
        let second: Vec<(u64, Account)> = work.entries()?.collect::<Result<_>>()?;
        assert_eq!(first.len(), 2);
        assert_eq!(second, vec![(2, account("bob", 20))]);
        Ok(())
    })
    .unwrap();
}

fn check_add_rejects_index_in_use<Repo: Repository<u64, Account>>(repo: &Repo) {
    seed(repo, &[account("ada", 10)]);

    let err = repo
        .start_work(|work| -> Result<u64> {
            let index = work.add(&account("imposter", 0))?;
            work.commit()?;
            Ok(index)
        })
        .unwrap_err();

    match err {
        RepositoryError::FactoryExhausted { reason } => assert!(reason.contains('1')),
        other => panic!("expected FactoryExhausted, got: {:?}", other),
    }
    assert_eq!(repo.all_items().unwrap(), vec![(1, account("ada", 10))]);
}

macro_rules! contract_tests {
    ($backend:ident) => {
        mod $backend {
            use super::*;

            #[test]
            fn test_commit_round_trip() {
                check_commit_round_trip(&super::$backend(SequentialIndex::new()).repo);
            }

            #[test]
            fn test_failed_work_discards_changes() {
                check_failed_work_discards_changes(&super::$backend(SequentialIndex::new()).repo);
            }

            #[test]
            fn test_explicit_rollback() {
                check_explicit_rollback(&super::$backend(SequentialIndex::new()).repo);
            }

            #[test]
            fn test_missing_index_errors() {
                check_missing_index_errors(&super::$backend(SequentialIndex::new()).repo);
            }

            #[test]
            fn test_multiple_commits() {
                check_multiple_commits(&super::$backend(SequentialIndex::new()).repo);
            }

            #[test]
            fn test_entries_are_restartable() {
                check_entries_are_restartable(&super::$backend(SequentialIndex::new()).repo);
            }

            #[test]
            fn test_add_rejects_index_in_use() {
                check_add_rejects_index_in_use(&super::$backend(|| 1u64).repo);
            }
        }
    };
}

contract_tests!(memory);
contract_tests!(file);
contract_tests!(sqlite);

// -----------------------------------------------------------------------
// Scenarios
// -----------------------------------------------------------------------

#[test]
fn test_empty_file_backend_add_and_commit() {
    let fixture = file(SequentialIndex::new());
    let repo = &fixture.repo;

    let index = repo
        .start_work(|work| -> Result<u64> {
            let index = work.add(&account("r1", 1))?;
            work.commit()?;
            Ok(index)
        })
        .unwrap();

    assert_eq!(index, 1);
    assert_eq!(repo.get(&1).unwrap(), account("r1", 1));
    assert_eq!(repo.len().unwrap(), 1);
}

#[test]
fn test_memory_backend_error_before_commit() {
    let repo: MemoryRepository<u64, Account> = MemoryRepository::new(SequentialIndex::new())
        .with_entries([(&2, &account("r2", 2))])
        .unwrap();

    #[derive(Debug)]
    enum AppError {
        Storage(RepositoryError),
        Rejected,
    }

    impl From<RepositoryError> for AppError {
        fn from(err: RepositoryError) -> Self {
            AppError::Storage(err)
        }
    }

    let result = repo.start_work(|work| -> std::result::Result<(), AppError> {
        work.set(&2, &account("r2-prime", 3))?;
        Err(AppError::Rejected)
    });

    assert!(matches!(result, Err(AppError::Rejected)));
    assert_eq!(repo.get(&2).unwrap(), account("r2", 2));
}

#[test]
fn test_file_backend_missing_path_is_empty() {
    let dir = tempfile::tempdir().unwrap();
    let repo: FileRepository<u64, Account> = FileRepository::new(
        dir.path().join("never").join("created.json"),
        SequentialIndex::new(),
    );

    assert_eq!(repo.all_items().unwrap(), Vec::new());
    assert!(repo.is_empty().unwrap());
}

#[test]
fn test_file_state_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("accounts.json");

    {
        let repo: FileRepository<u64, Account> = FileRepository::new(&path, SequentialIndex::new());
        seed(&repo, &[account("ada", 10), account("bob", 20)]);
    }

    let existing: Vec<u64> = {
        let probe: FileRepository<u64, Account> =
            FileRepository::new(&path, SequentialIndex::new());
        probe.keys().unwrap().collect::<Result<_>>().unwrap()
    };
    let repo: FileRepository<u64, Account> =
        FileRepository::new(&path, SequentialIndex::after(&existing));
    let index = repo
        .start_work(|work| -> Result<u64> {
            let index = work.add(&account("cy", 30))?;
            work.commit()?;
            Ok(index)
        })
        .unwrap();

    assert_eq!(index, 3);
    assert_eq!(repo.len().unwrap(), 3);
}

#[test]
fn test_sqlite_state_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("accounts.db");

    {
        let repo: SqliteRepository<u64, Account> =
            SqliteRepository::new(&path, SequentialIndex::new()).unwrap();
        seed(&repo, &[account("ada", 10)]);
    }

    let repo: SqliteRepository<u64, Account> =
        SqliteRepository::new(&path, SequentialIndex::starting_at(2)).unwrap();
    assert_eq!(repo.get(&1).unwrap(), account("ada", 10));
}
