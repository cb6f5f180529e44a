#![allow(dead_code)]

use ora_engine::provider::ColumnDesc;
use ora_engine::testing::MockProvider;
use ora_engine::{EnvCfg, Environment, SesCfg, Server, Session, SrvCfg, WireType};
use std::sync::{Arc, Once};

static INIT: Once = Once::new();

pub fn init_logging() {
    INIT.call_once(|| {
        let _ = env_logger::builder().is_test(true).try_init();
    });
}

/// Environment, Server and Session opened on a fresh mock provider.
pub struct Tree {
    pub mock: Arc<MockProvider>,
    pub env: Arc<Environment>,
    pub srv: Arc<Server>,
    pub ses: Arc<Session>,
}

pub fn open_tree() -> Tree {
    open_tree_with(EnvCfg::default(), SesCfg::new("scott", "tiger"))
}

pub fn open_tree_with(env_cfg: EnvCfg, ses_cfg: SesCfg) -> Tree {
    init_logging();
    let mock = Arc::new(MockProvider::new());
    let env = Environment::open(mock.clone(), env_cfg).expect("open environment");
    let srv = env.open_server(SrvCfg::new("orcl")).expect("open server");
    let ses = srv.open_session(ses_cfg).expect("open session");
    Tree { mock, env, srv, ses }
}

pub fn column(name: &str, wire: WireType) -> ColumnDesc {
    ColumnDesc {
        name: name.to_string(),
        wire,
        nullable: true,
    }
}
