use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;

/// 重试策略
#[derive(Debug, Clone)]
pub enum RetryStrategy {
    /// 固定延迟
    Fixed(Duration),
    /// 指数退避
    Exponential {
        initial: Duration,
        multiplier: f64,
        max_delay: Duration,
    },
}

impl RetryStrategy {
    /// 计算第 n 次重试的延迟
    pub fn get_delay(&self, attempt: u32) -> Duration {
        match self {
            RetryStrategy::Fixed(delay) => *delay,
            RetryStrategy::Exponential { initial, multiplier, max_delay } => {
                let delay = initial.as_secs_f64() * multiplier.powf(attempt as f64);
                let delay = Duration::from_secs_f64(delay);
                std::cmp::min(delay, *max_delay)
            }
        }
    }
}

/// 重试配置
pub struct RetryConfig<E> {
    /// 最大尝试次数（至少执行一次）
    pub max_attempts: u32,
    /// 重试策略
    pub strategy: RetryStrategy,
    /// 是否重试的判断函数
    pub should_retry: Box<dyn Fn(&E) -> bool + Send + Sync>,
}

impl<E> Default for RetryConfig<E> {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            strategy: RetryStrategy::Exponential {
                initial: Duration::from_secs(1),
                multiplier: 2.0,
                max_delay: Duration::from_secs(30),
            },
            should_retry: Box::new(|_| true),
        }
    }
}

/// 执行带重试的操作
pub async fn retry_with_config<F, Fut, T, E>(
    config: &RetryConfig<E>,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let max_attempts = config.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        match operation().await {
            Ok(result) => return Ok(result),
            Err(error) => {
                attempt += 1;

                if attempt >= max_attempts || !(config.should_retry)(&error) {
                    return Err(error);
                }

                let delay = config.strategy.get_delay(attempt - 1);
                tracing::debug!(attempt, ?delay, "retrying after failure");
                sleep(delay).await;
            }
        }
    }
}

/// 重试构建器
pub struct RetryBuilder<E> {
    config: RetryConfig<E>,
}

impl<E> Default for RetryBuilder<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> RetryBuilder<E> {
    pub fn new() -> Self {
        Self {
            config: RetryConfig::default(),
        }
    }

    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.config.max_attempts = attempts;
        self
    }

    pub fn strategy(mut self, strategy: RetryStrategy) -> Self {
        self.config.strategy = strategy;
        self
    }

    pub fn should_retry<F>(mut self, f: F) -> Self
    where
        F: Fn(&E) -> bool + Send + Sync + 'static,
    {
        self.config.should_retry = Box::new(f);
        self
    }

    pub fn build(self) -> RetryConfig<E> {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast() -> RetryBuilder<&'static str> {
        RetryBuilder::new().strategy(RetryStrategy::Fixed(Duration::from_millis(1)))
    }

    #[tokio::test]
    async fn test_retry_success() {
        let config = fast().build();
        let mut count = 0;
        let result = retry_with_config(&config, || {
            count += 1;
            let current = count;
            async move {
                if current < 3 { Err("transient") } else { Ok(42) }
            }
        }).await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(count, 3);
    }

    #[tokio::test]
    async fn test_retry_failure() {
        let config = fast().build();
        let mut count = 0;
        let result = retry_with_config(&config, || {
            count += 1;
            async { Err::<(), _>("down") }
        }).await;

        assert!(result.is_err());
        assert_eq!(count, 3); // 默认最大尝试次数
    }

    #[tokio::test]
    async fn test_non_retryable_error_stops() {
        let config = fast().should_retry(|err| *err != "fatal").build();
        let mut count = 0;
        let result = retry_with_config(&config, || {
            count += 1;
            async { Err::<(), _>("fatal") }
        }).await;

        assert_eq!(result, Err("fatal"));
        assert_eq!(count, 1);
    }

    #[test]
    fn test_exponential_delay_is_capped() {
        let strategy = RetryStrategy::Exponential {
            initial: Duration::from_secs(1),
            multiplier: 2.0,
            max_delay: Duration::from_secs(5),
        };

        assert_eq!(strategy.get_delay(0), Duration::from_secs(1));
        assert_eq!(strategy.get_delay(2), Duration::from_secs(4));
        assert_eq!(strategy.get_delay(5), Duration::from_secs(5));
    }
}
