//! KrishiVaani - 农业咨询智能体编排核心
//!
//! 模块划分：
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 错误类型、重试策略、编排器（Orchestrator）、组件构建器
//! - **gateway**: HTTP 接口（/chat、/chat/speech、/chat/rollback 等）
//! - **llm**: 模型客户端抽象与实现（OpenAI 兼容 / 离线 Mock / 脚本化测试客户端）、嵌入
//! - **observability**: 日志初始化
//! - **rag**: 检索增强：分块、向量存储、上下文拼装
//! - **react**: 工具调用主循环与 prompt 拼装
//! - **session**: 会话存储、轮次（Turn）与回滚管理
//! - **tools**: 工具注册表、分发器与农业咨询工具

pub mod config;
pub mod core;
pub mod gateway;
pub mod llm;
pub mod observability;
pub mod rag;
pub mod react;
pub mod session;
pub mod tools;

pub use crate::core::{AgentBuilder, AgentError, ChatMode, ChatRequest, ChatResponse, Orchestrator};
