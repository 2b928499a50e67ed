/// 用户信息缓存键前缀
const USER_INFO_PREFIX: &str = "user:info:";

/// 生成用户信息缓存键
pub fn user_info_key(user_id: i64) -> String {
    format!("{}{}", USER_INFO_PREFIX, user_id)
}
