pub mod evaluator;
pub mod objective;
pub mod pool;

pub mod external {
    pub mod gulp;
}
